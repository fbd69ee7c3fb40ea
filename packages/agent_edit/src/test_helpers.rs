//! In-process fakes for the document store and the agent socket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::{Json, Router};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::connection::ConnectionEvent;
use crate::error::GatewayError;
use crate::gateway::{
    Actor, FileContent, FileInfo, FileWrite, Snapshot, SnapshotList, VersionGateway, WriteReceipt,
};
use crate::protocol::{ClientMessage, EditRequest};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive the next connection event or fail the test.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("connection event channel closed")
}

fn not_found(message: &str) -> GatewayError {
    GatewayError::Status {
        status: 404,
        message: message.to_string(),
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, String>,
    /// Oldest first, with the content each snapshot captured.
    snapshots: Vec<(Snapshot, String)>,
    clock: u64,
}

impl MemoryState {
    fn tick(&mut self) -> String {
        self.clock += 1;
        format!(
            "2026-01-01T{:02}:{:02}:00+00:00",
            self.clock / 60,
            self.clock % 60
        )
    }

    fn write(&mut self, path: &str, content: &str, reason: String, actor: Actor) -> String {
        let created_at = self.tick();
        let id = format!("snap-{}", self.snapshots.len() + 1);
        self.files.insert(path.to_string(), content.to_string());
        self.snapshots.push((
            Snapshot {
                id: id.clone(),
                path: path.to_string(),
                created_at,
                reason,
                actor,
                size_bytes: content.len() as u64,
            },
            content.to_string(),
        ));
        id
    }

    fn updated_at(&self, path: &str) -> String {
        self.snapshots
            .iter()
            .rev()
            .find(|(s, _)| s.path == path)
            .map(|(s, _)| s.created_at.clone())
            .unwrap_or_default()
    }
}

/// Snapshot store kept in memory, with deterministic ids and timestamps.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with one document and its `seed` snapshot.
    pub fn with_file(path: &str, content: &str) -> Self {
        let gateway = Self::new();
        gateway
            .state
            .try_lock()
            .expect("fresh store")
            .write(path, content, "seed".into(), Actor::System);
        gateway
    }

    /// Make every subsequent write fail with a 500.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far, reverts included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn content(&self, path: &str) -> Option<String> {
        self.state.lock().await.files.get(path).cloned()
    }

    fn check_writable(&self) -> Result<(), GatewayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 500,
                message: "disk full".into(),
            });
        }
        Ok(())
    }
}

impl VersionGateway for MemoryGateway {
    async fn read_file(&self, path: &str) -> Result<FileContent, GatewayError> {
        let state = self.state.lock().await;
        let content = state.files.get(path).ok_or_else(|| not_found("File not found"))?;
        Ok(FileContent {
            path: path.to_string(),
            content: content.clone(),
        })
    }

    async fn write_file(&self, path: &str, write: FileWrite) -> Result<WriteReceipt, GatewayError> {
        self.check_writable()?;
        let snapshot_id = self
            .state
            .lock()
            .await
            .write(path, &write.content, write.reason, write.actor);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReceipt {
            path: path.to_string(),
            snapshot_id,
        })
    }

    async fn list_snapshots(&self, path: &str) -> Result<SnapshotList, GatewayError> {
        let state = self.state.lock().await;
        let snapshots = state
            .snapshots
            .iter()
            .rev()
            .filter(|(s, _)| s.path == path)
            .map(|(s, _)| s.clone())
            .collect();
        Ok(SnapshotList {
            path: path.to_string(),
            snapshots,
        })
    }

    async fn revert(&self, path: &str, snapshot_id: &str) -> Result<WriteReceipt, GatewayError> {
        let mut state = self.state.lock().await;
        let content = state
            .snapshots
            .iter()
            .find(|(s, _)| s.id == snapshot_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| not_found("Snapshot not found"))?;
        self.check_writable()?;
        let snapshot_id = state.write(path, &content, format!("revert:{snapshot_id}"), Actor::User);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReceipt {
            path: path.to_string(),
            snapshot_id,
        })
    }

    async fn list_files(&self) -> Result<Vec<FileInfo>, GatewayError> {
        let state = self.state.lock().await;
        let mut files: Vec<FileInfo> = state
            .files
            .iter()
            .map(|(path, content)| FileInfo {
                path: path.clone(),
                size_bytes: content.len() as u64,
                updated_at: state.updated_at(path),
            })
            .collect();
        files.sort_by_key(|f| f.path.to_lowercase());
        Ok(files)
    }

    async fn create_file(&self, path: &str, template: Option<&str>) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if state.files.contains_key(path) {
            return Err(GatewayError::Status {
                status: 409,
                message: "File exists".into(),
            });
        }
        state.write(path, template.unwrap_or(""), "create".into(), Actor::User);
        Ok(())
    }

    async fn health(&self) -> Result<bool, GatewayError> {
        Ok(true)
    }
}

// --- HTTP front for MemoryGateway ---

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

#[derive(Deserialize)]
struct RevertBody {
    path: String,
    snapshot_id: String,
}

#[derive(Deserialize)]
struct NewFileBody {
    path: String,
    template: Option<String>,
}

fn store_response<T: serde::Serialize>(result: Result<T, GatewayError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(GatewayError::Status { status, message }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn read_handler(State(store): State<MemoryGateway>, Query(q): Query<PathQuery>) -> Response {
    store_response(store.read_file(&q.path).await)
}

async fn write_handler(
    State(store): State<MemoryGateway>,
    Query(q): Query<PathQuery>,
    Json(write): Json<FileWrite>,
) -> Response {
    store_response(store.write_file(&q.path, write).await)
}

async fn snapshots_handler(
    State(store): State<MemoryGateway>,
    Query(q): Query<PathQuery>,
) -> Response {
    store_response(store.list_snapshots(&q.path).await)
}

async fn revert_handler(State(store): State<MemoryGateway>, Json(body): Json<RevertBody>) -> Response {
    store_response(store.revert(&body.path, &body.snapshot_id).await)
}

async fn files_handler(State(store): State<MemoryGateway>) -> Response {
    store_response(store.list_files().await)
}

async fn new_file_handler(
    State(store): State<MemoryGateway>,
    Json(body): Json<NewFileBody>,
) -> Response {
    let result = store.create_file(&body.path, body.template.as_deref()).await;
    store_response(result.map(|()| serde_json::json!({ "ok": true })))
}

/// Serve `store` over the HTTP API on an ephemeral port.
///
/// Returns the base URL and the server task; the server stops when the task
/// handle is aborted or the test runtime shuts down.
pub async fn serve_store(store: MemoryGateway) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/api/health", get(|| async { Json(serde_json::json!({ "ok": true })) }))
        .route("/api/files", get(files_handler))
        .route("/api/file", get(read_handler).put(write_handler))
        .route("/api/file/new", post(new_file_handler))
        .route("/api/snapshots", get(snapshots_handler))
        .route("/api/snapshots/revert", post(revert_handler))
        .route("/api/teapot", get(|| async { StatusCode::IM_A_TEAPOT }))
        .with_state(store);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind store");
    let addr = listener.local_addr().expect("store addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("store server");
    });
    (format!("http://{addr}"), task)
}

// --- Fake agent socket ---

#[derive(Clone)]
enum Script {
    /// Send these frames as soon as a client connects.
    OnConnect { frames: Vec<String>, close: bool },
    /// Send these frames in reply to every `edit` message.
    OnEdit(Vec<String>),
}

/// WebSocket server standing in for the agent.
pub struct AgentServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: mpsc::UnboundedReceiver<EditRequest>,
    task: JoinHandle<()>,
}

impl AgentServer {
    /// Push `frames` to every client on connect, then keep the socket open.
    pub async fn start(frames: Vec<String>) -> Self {
        Self::bind(Script::OnConnect {
            frames,
            close: false,
        })
        .await
    }

    /// Push `frames` to every client on connect, then close the socket.
    pub async fn start_closing(frames: Vec<String>) -> Self {
        Self::bind(Script::OnConnect {
            frames,
            close: true,
        })
        .await
    }

    /// Answer every `edit` message with `frames`.
    pub async fn start_replying(frames: Vec<String>) -> Self {
        Self::bind(Script::OnEdit(frames)).await
    }

    /// Like [`start`](Self::start) or [`start_closing`](Self::start_closing),
    /// on a fixed address.
    pub async fn start_on(addr: SocketAddr, frames: Vec<String>, close: bool) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind agent server");
        Self::serve(listener, Script::OnConnect { frames, close })
    }

    async fn bind(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind agent server");
        Self::serve(listener, script)
    }

    fn serve(listener: TcpListener, script: Script) -> Self {
        let addr = listener.local_addr().expect("agent server addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let (requests_tx, requests) = mpsc::unbounded_channel();

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_agent_client(stream, script.clone(), requests_tx.clone()));
            }
        });

        Self {
            addr,
            accepted,
            requests,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/agent", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next edit request received from any client.
    pub async fn next_request(&mut self) -> EditRequest {
        timeout(TEST_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for edit request")
            .expect("agent server stopped")
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_agent_client(
    stream: tokio::net::TcpStream,
    script: Script,
    requests: mpsc::UnboundedSender<EditRequest>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    if let Script::OnConnect { frames, close } = &script {
        for frame in frames {
            if write.send(Message::Text(frame.clone().into())).await.is_err() {
                return;
            }
        }
        if *close {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    }

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(ClientMessage::Edit { request }) = serde_json::from_str(text.as_str()) else {
            continue;
        };
        let _ = requests.send(request);
        if let Script::OnEdit(frames) = &script {
            for frame in frames {
                if write.send(Message::Text(frame.clone().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}
