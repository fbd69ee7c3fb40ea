//! VersionGateway: the snapshot-versioned document store.
//!
//! Every write creates an immutable snapshot on the store side. Reverting
//! writes a snapshot's bytes back as a new version, so history only grows.

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GatewayError;

/// Who produced a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Actor {
    User,
    Ai,
    /// Store-initiated writes such as the seed document.
    System,
    Other(String),
}

impl Actor {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::System => "system",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Self::User,
            "ai" => Self::Ai,
            "system" => Self::System,
            _ => Self::Other(s),
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub path: String,
    pub created_at: String,
    pub reason: String,
    pub actor: Actor,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotList {
    pub path: String,
    /// Newest first.
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Body of a versioned write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub content: String,
    pub reason: String,
    pub actor: Actor,
}

impl FileWrite {
    /// A write committing an accepted agent edit.
    pub fn ai(patched: impl Into<String>, instruction: &str) -> Self {
        Self {
            content: patched.into(),
            reason: format!("ai:{instruction}"),
            actor: Actor::Ai,
        }
    }

    pub fn user(content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reason: reason.into(),
            actor: Actor::User,
        }
    }
}

/// Response to a write or a revert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub path: String,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size_bytes: u64,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
struct RevertRequest<'a> {
    path: &'a str,
    snapshot_id: &'a str,
}

#[derive(Debug, Serialize)]
struct NewFileRequest<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct Ack {
    #[serde(default)]
    ok: bool,
}

/// The document store the editor commits to.
///
/// Failures are returned as-is; nothing here retries.
pub trait VersionGateway: Send + Sync {
    fn read_file(&self, path: &str)
    -> impl Future<Output = Result<FileContent, GatewayError>> + Send;

    fn write_file(
        &self,
        path: &str,
        write: FileWrite,
    ) -> impl Future<Output = Result<WriteReceipt, GatewayError>> + Send;

    fn list_snapshots(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<SnapshotList, GatewayError>> + Send;

    fn revert(
        &self,
        path: &str,
        snapshot_id: &str,
    ) -> impl Future<Output = Result<WriteReceipt, GatewayError>> + Send;

    fn list_files(&self) -> impl Future<Output = Result<Vec<FileInfo>, GatewayError>> + Send;

    fn create_file(
        &self,
        path: &str,
        template: Option<&str>,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// `Ok(true)` when the store reports itself healthy.
    fn health(&self) -> impl Future<Output = Result<bool, GatewayError>> + Send;
}

/// [`VersionGateway`] over the store's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    api_base: String,
}

impl HttpGateway {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base, endpoint)
    }

    /// Send `request` and decode the JSON body.
    ///
    /// A non-2xx status becomes [`GatewayError::Status`] carrying the body
    /// text, or `HTTP <code>` when the body is empty. An empty 2xx body
    /// decodes as `{}`.
    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let resp = request.send().await.map_err(GatewayError::from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(GatewayError::from_reqwest)?;

        if !status.is_success() {
            let message = if text.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                text
            };
            debug!(status = status.as_u16(), %message, "document store request failed");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = if text.trim().is_empty() { "{}" } else { &text };
        Ok(serde_json::from_str(body)?)
    }
}

impl VersionGateway for HttpGateway {
    async fn read_file(&self, path: &str) -> Result<FileContent, GatewayError> {
        let request = self.client.get(self.url("/api/file")).query(&[("path", path)]);
        self.fetch_json(request).await
    }

    async fn write_file(&self, path: &str, write: FileWrite) -> Result<WriteReceipt, GatewayError> {
        let request = self
            .client
            .put(self.url("/api/file"))
            .query(&[("path", path)])
            .json(&write);
        self.fetch_json(request).await
    }

    async fn list_snapshots(&self, path: &str) -> Result<SnapshotList, GatewayError> {
        let request = self
            .client
            .get(self.url("/api/snapshots"))
            .query(&[("path", path)]);
        self.fetch_json(request).await
    }

    async fn revert(&self, path: &str, snapshot_id: &str) -> Result<WriteReceipt, GatewayError> {
        let request = self
            .client
            .post(self.url("/api/snapshots/revert"))
            .json(&RevertRequest { path, snapshot_id });
        self.fetch_json(request).await
    }

    async fn list_files(&self) -> Result<Vec<FileInfo>, GatewayError> {
        self.fetch_json(self.client.get(self.url("/api/files"))).await
    }

    async fn create_file(&self, path: &str, template: Option<&str>) -> Result<(), GatewayError> {
        let request = self
            .client
            .post(self.url("/api/file/new"))
            .json(&NewFileRequest { path, template });
        let _: Ack = self.fetch_json(request).await?;
        Ok(())
    }

    async fn health(&self) -> Result<bool, GatewayError> {
        let ack: Ack = self.fetch_json(self.client.get(self.url("/api/health"))).await?;
        Ok(ack.ok)
    }
}
