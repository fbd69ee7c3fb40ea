use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_edit::ReconnectPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [server]
//                    api_base = "http://localhost:8000"
//
//   env var:         QUILL_SERVER__API_BASE=http://localhost:8000
//
//   (double underscore = nesting; single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Where the document store and agent live (under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Defaults to `api_base` with the scheme swapped to `ws`/`wss`.
    #[serde(default)]
    pub ws_base: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Agent channel reconnect schedule (under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_retry: default_max_retry(),
        }
    }
}

impl ReconnectFileConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            factor: self.factor,
            max_retry: self.max_retry,
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:8000".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_factor() -> f64 {
    1.6
}
fn default_max_retry() -> u32 {
    6
}

/// Build a figment that layers: defaults → config.toml → QUILL_* env vars.
///
///   `QUILL_SERVER__API_BASE=https://notes.example`  →  `server.api_base`
///   `QUILL_RECONNECT__MAX_RETRY=3`                  →  `reconnect.max_retry`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("QUILL_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub api_base: String,
    pub ws_base: String,
    /// How long `edit` waits for the agent channel before giving up.
    pub connect_timeout: Duration,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        let api_base = fc.api_base.trim_end_matches('/').to_string();
        let ws_base = match &fc.ws_base {
            Some(ws) => ws.trim_end_matches('/').to_string(),
            None => derive_ws_base(&api_base),
        };
        Self {
            api_base,
            ws_base,
            connect_timeout: Duration::from_secs(fc.connect_timeout_secs),
        }
    }

    pub fn agent_ws_url(&self) -> String {
        format!("{}/ws/agent", self.ws_base)
    }
}

fn derive_ws_base(api_base: &str) -> String {
    if let Some(rest) = api_base.strip_prefix("https:") {
        format!("wss:{rest}")
    } else if let Some(rest) = api_base.strip_prefix("http:") {
        format!("ws:{rest}")
    } else {
        api_base.to_string()
    }
}

// =============================================================================
// Directory layout (not tunable via figment; derived from --config-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct QuillConfig {
    pub config_dir: PathBuf,
}

impl QuillConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".quill"),
        };

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        debug!("Config directory: {}", config_dir.display());

        Ok(Self { config_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
