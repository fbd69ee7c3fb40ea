//! `quill edit`: run one agent edit against a document.
//!
//! Opens the document, waits for the agent channel, submits the instruction,
//! streams the agent's log and draft to stderr, then prints the diff and asks
//! whether to commit it as a new snapshot.

use std::io::Write;

use agent_edit::{
    AgentSession, ConnectionManager, EditorError, EditorSession, GatewayError, HttpGateway,
    ReadyEdit, ReconnectPolicy, Selection,
};
use anyhow::{Result, bail};
use tokio::time::timeout;
use tracing::{debug, info};

use super::store_error;
use crate::EditArgs;
use crate::config::ServerConfig;

pub async fn edit_command(server: &ServerConfig, policy: ReconnectPolicy, args: EditArgs) -> Result<()> {
    let gateway = HttpGateway::new(server.api_base.clone());
    let (connection, events) = ConnectionManager::new(server.agent_ws_url(), policy);
    let mut editor = EditorSession::new(gateway, connection, events);
    editor.init();

    let result = run_edit(&mut editor, server, &args).await;
    editor.teardown().await;
    result
}

async fn run_edit(
    editor: &mut EditorSession<HttpGateway>,
    server: &ServerConfig,
    args: &EditArgs,
) -> Result<()> {
    editor
        .open(&args.path)
        .await
        .map_err(|e| editor_error(e, server))?;

    let connected = timeout(server.connect_timeout, editor.connection().wait_connected()).await;
    if !matches!(connected, Ok(true)) {
        bail!(
            "Agent at {} did not accept a connection within {}s",
            editor.connection().url(),
            server.connect_timeout.as_secs()
        );
    }

    let selection = Selection::new(args.from, args.to.unwrap_or(args.from));
    let target = editor.submit(&args.instruction, selection)?;
    info!(path = %args.path, from = target.from, to = target.to, "waiting for agent");
    eprintln!(
        "[quill: editing {}, {} chars at {}..{}]",
        args.path,
        target.len(),
        target.from,
        target.to
    );

    let Some(ready) = stream_until_settled(editor).await? else {
        return Ok(());
    };

    eprintln!();
    eprintln!("[quill: {}]", ready.summary);
    if ready.diff.is_empty() {
        eprintln!("[quill: agent returned no diff]");
    } else {
        println!("{}", ready.diff);
    }

    let current_empty = editor.document().is_none_or(|doc| doc.content.is_empty());
    if ready.patched.is_empty() && !current_empty {
        editor.close_session();
        bail!("Agent returned no patched content; the document was left unchanged");
    }

    if args.apply || confirm_apply() {
        match editor.apply().await.map_err(|e| editor_error(e, server))? {
            Some(snapshot_id) => println!("Applied as snapshot {snapshot_id}"),
            None => debug!("apply found no ready edit"),
        }
    } else {
        editor.close_session();
        eprintln!("[quill: discarded]");
    }
    Ok(())
}

/// Feed agent events until the session is ready, fails, or the user hits
/// Ctrl-C. Returns the ready edit, or `None` when cancelled.
async fn stream_until_settled(editor: &mut EditorSession<HttpGateway>) -> Result<Option<ReadyEdit>> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut log_shown = 0;
    let mut draft_shown = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                editor.close_session();
                eprintln!("\n[quill: cancelled]");
                return Ok(None);
            }

            event = editor.next_event() => {
                if event.is_none() {
                    bail!("Agent channel shut down");
                }
            }
        }

        match editor.session() {
            AgentSession::Streaming { draft, log, .. } => {
                for line in log.iter().skip(log_shown) {
                    eprintln!("  · {line}");
                }
                log_shown = log.len();
                let fresh = unseen(draft, &mut draft_shown);
                if !fresh.is_empty() {
                    eprint!("{fresh}");
                    let _ = std::io::stderr().flush();
                }
            }
            AgentSession::Ready(edit) => return Ok(Some(edit.clone())),
            AgentSession::Error { message } => {
                let message = message.clone();
                editor.close_session();
                bail!("Agent failed: {message}");
            }
            AgentSession::Idle => {}
        }
    }
}

/// The part of an append-only `text` not yet printed.
fn unseen<'a>(text: &'a str, shown: &mut usize) -> &'a str {
    let fresh = text.get(*shown..).unwrap_or("");
    *shown = text.len();
    fresh
}

fn confirm_apply() -> bool {
    eprint!("Apply this edit? [y/N] ");
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    is_yes(&input)
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn editor_error(err: EditorError, server: &ServerConfig) -> anyhow::Error {
    match err {
        EditorError::Gateway(e @ GatewayError::Unavailable) => store_error(e, server),
        other => other.into(),
    }
}
