use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::{FileConfig, QuillConfig, ServerConfig, load_config};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Agent-assisted editing for documents in a snapshot store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to ~/.quill)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Document store base URL (overrides config)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the agent to edit a document
    Edit(EditArgs),

    /// List a document's snapshots, newest first
    History(HistoryArgs),

    /// Restore a snapshot as the newest version of a document
    Revert(RevertArgs),

    /// List documents in the store
    Files(FilesArgs),

    /// Create a new document
    New(NewArgs),

    /// Print a document's current content
    Show(ShowArgs),
}

#[derive(Parser)]
pub struct EditArgs {
    /// Document path in the store
    pub path: String,

    /// What the agent should do
    #[arg(short, long)]
    pub instruction: String,

    /// Start of the selection in chars (caret position when --to is omitted)
    #[arg(long, default_value = "0")]
    pub from: usize,

    /// End of the selection in chars
    #[arg(long)]
    pub to: Option<usize>,

    /// Apply the result without asking
    #[arg(long, visible_alias = "yes", short = 'y')]
    pub apply: bool,
}

#[derive(Parser)]
struct HistoryArgs {
    path: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct RevertArgs {
    path: String,

    /// Snapshot ID to restore
    snapshot: String,
}

#[derive(Parser)]
struct FilesArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct NewArgs {
    path: String,

    /// Initial content
    #[arg(long)]
    template: Option<String>,
}

#[derive(Parser)]
struct ShowArgs {
    path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let config = QuillConfig::new(cli.config_dir.clone())?;
    let mut fc: FileConfig = load_config(&config.config_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {:?}", config.config_toml_path()))?;
    if let Some(api_base) = cli.api_base {
        fc.server.api_base = api_base;
    }
    let server = ServerConfig::from_file(&fc.server);
    let policy = fc.reconnect.policy();

    match cli.command {
        Commands::Edit(args) => cli::edit::edit_command(&server, policy, args).await,
        Commands::History(args) => cli::history_command(&server, &args.path, args.json).await,
        Commands::Revert(args) => cli::revert_command(&server, &args.path, &args.snapshot).await,
        Commands::Files(args) => cli::files_command(&server, args.json).await,
        Commands::New(args) => {
            cli::new_command(&server, &args.path, args.template.as_deref()).await
        }
        Commands::Show(args) => cli::show_command(&server, &args.path).await,
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(debug: bool) {
    let default_directive = if debug {
        "quill=debug,agent_edit=debug,info"
    } else {
        "quill=info,agent_edit=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
