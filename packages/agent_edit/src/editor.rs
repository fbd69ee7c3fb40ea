//! EditorSession: the owned object a front end drives.
//!
//! Holds the connection, the session state machine, the open document, the
//! cached snapshot list and the document store. Every mutation happens through
//! `&mut self` on the owning task; inbound agent traffic arrives through
//! [`EditorSession::next_event`] in order.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::document::FileDocument;
use crate::error::{EditorError, SubmitError};
use crate::gateway::{FileInfo, FileWrite, Snapshot, VersionGateway};
use crate::protocol::{AgentEvent, EditRequest, Selection};
use crate::session::{AgentSession, AgentSessionMachine};

pub const CONNECTION_LOST_MESSAGE: &str = "Agent connection lost";
pub const AUTOSAVE_REASON: &str = "autosave";

pub struct EditorSession<G: VersionGateway> {
    gateway: G,
    connection: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    machine: AgentSessionMachine,
    document: Option<FileDocument>,
    snapshots: Vec<Snapshot>,
}

impl<G: VersionGateway> EditorSession<G> {
    pub fn new(
        gateway: G,
        connection: ConnectionManager,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Self {
        Self {
            gateway,
            connection,
            events,
            machine: AgentSessionMachine::new(),
            document: None,
            snapshots: Vec::new(),
        }
    }

    /// Open the agent channel.
    pub fn init(&mut self) {
        self.connection.connect();
    }

    /// Close the agent channel for good.
    pub async fn teardown(&mut self) {
        self.connection.teardown().await;
    }

    pub fn session(&self) -> &AgentSession {
        self.machine.session()
    }

    pub fn document(&self) -> Option<&FileDocument> {
        self.document.as_ref()
    }

    /// Snapshots of the open document, newest first.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    // --- Document operations ---

    /// Load `path` into the buffer.
    ///
    /// A dirty buffer for a different path is autosaved first; if that save
    /// fails the current document stays open.
    pub async fn open(&mut self, path: &str) -> Result<&FileDocument, EditorError> {
        let autosave = self
            .document
            .as_ref()
            .is_some_and(|doc| doc.dirty && doc.path != path);
        if autosave {
            debug!(next = path, "autosaving before switching documents");
            self.save(AUTOSAVE_REASON).await?;
        }

        let file = self.gateway.read_file(path).await?;
        debug!(path = %file.path, chars = file.content.chars().count(), "document opened");
        self.snapshots.clear();
        self.document = Some(FileDocument::open(file.path, file.content));
        self.refresh_snapshots_logged().await;
        self.document.as_ref().ok_or(EditorError::NoDocument)
    }

    /// Apply a user edit to the buffer. Returns `false` without an open
    /// document or when nothing changed.
    pub fn edit_buffer(&mut self, content: impl Into<String>) -> bool {
        match &mut self.document {
            Some(doc) => doc.edit(content),
            None => false,
        }
    }

    /// Write the buffer as a user snapshot. `Ok(None)` without an open
    /// document.
    pub async fn save(&mut self, reason: &str) -> Result<Option<String>, EditorError> {
        let Some(doc) = &self.document else {
            return Ok(None);
        };
        let receipt = self
            .gateway
            .write_file(&doc.path, FileWrite::user(doc.content.clone(), reason))
            .await?;
        if let Some(doc) = &mut self.document {
            doc.dirty = false;
        }
        info!(snapshot_id = %receipt.snapshot_id, reason, "document saved");
        self.refresh_snapshots_logged().await;
        Ok(Some(receipt.snapshot_id))
    }

    pub async fn list_files(&self) -> Result<Vec<FileInfo>, EditorError> {
        Ok(self.gateway.list_files().await?)
    }

    pub async fn create_file(&self, path: &str, template: Option<&str>) -> Result<(), EditorError> {
        self.gateway.create_file(path, template).await?;
        info!(path, "document created");
        Ok(())
    }

    pub async fn health(&self) -> Result<bool, EditorError> {
        Ok(self.gateway.health().await?)
    }

    // --- Agent session ---

    /// Send an edit instruction for the open document.
    ///
    /// Returns the span the instruction targets. Nothing changes unless the
    /// session is idle, the instruction is non-blank, a document is open and
    /// the channel is connected.
    pub fn submit(&mut self, instruction: &str, selection: Selection) -> Result<Selection, EditorError> {
        self.machine.ensure_idle()?;
        if instruction.trim().is_empty() {
            return Err(SubmitError::EmptyInstruction.into());
        }
        let doc = self.document.as_ref().ok_or(SubmitError::NoDocument)?;
        if !self.connection.is_connected() {
            return Err(SubmitError::Disconnected.into());
        }

        let request = EditRequest::build(&doc.path, &doc.content, selection, instruction)?;
        let message = self.machine.submit(&request)?;
        if !self.connection.send(&message) {
            self.machine.close();
            return Err(SubmitError::Disconnected.into());
        }

        info!(
            path = %request.path,
            from = request.selection.from,
            to = request.selection.to,
            "edit submitted"
        );
        Ok(request.selection)
    }

    /// Wait for the next connection event and fold it into the session.
    ///
    /// Returns `None` once the connection has been dropped.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.recv().await?;
        self.handle_connection_event(&event);
        Some(event)
    }

    pub fn handle_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => debug!("agent channel ready"),
            ConnectionEvent::Closed => {
                // A reconnect never resumes a stream.
                if self.machine.session().is_streaming() {
                    warn!("agent channel closed mid-stream; abandoning session");
                    self.machine.handle(AgentEvent::Error {
                        message: Some(CONNECTION_LOST_MESSAGE.to_string()),
                    });
                }
            }
            ConnectionEvent::Agent(agent_event) => {
                debug!(kind = agent_event.kind(), "agent event");
                self.machine.handle(agent_event.clone());
            }
        }
    }

    /// Dismiss the current session without touching the document.
    pub fn close_session(&mut self) -> bool {
        self.machine.close()
    }

    /// Commit the ready edit to the document it was requested for.
    ///
    /// The patched text is written to the store first; only once it returns a
    /// snapshot id does the session go back to idle. The buffer takes the
    /// patched text only when that document is still the open one. On failure
    /// the ready edit stays available. Returns `Ok(None)` when there is
    /// nothing to apply.
    pub async fn apply(&mut self) -> Result<Option<String>, EditorError> {
        let Some(ready) = self.machine.ready() else {
            debug!(state = self.machine.session().state_name(), "nothing to apply");
            return Ok(None);
        };
        let path = if ready.path.is_empty() {
            self.document.as_ref().ok_or(EditorError::NoDocument)?.path.clone()
        } else {
            ready.path.clone()
        };

        let write = FileWrite::ai(ready.patched.clone(), &ready.instruction);
        let receipt = self.gateway.write_file(&path, write).await?;

        let Some(edit) = self.machine.apply() else {
            return Ok(Some(receipt.snapshot_id));
        };
        match self.document.as_mut() {
            Some(doc) if doc.path == path => doc.commit(edit.patched),
            _ => debug!(path = %path, "applied document is not open; buffer untouched"),
        }
        info!(path = %path, snapshot_id = %receipt.snapshot_id, "agent edit applied");

        self.refresh_snapshots_logged().await;
        Ok(Some(receipt.snapshot_id))
    }

    // --- History ---

    /// Restore `snapshot_id` as the newest version of `path`.
    ///
    /// When `path` is the open document the buffer is reloaded. A failed
    /// reload is only logged; the revert itself has already been stored.
    pub async fn revert(&mut self, path: &str, snapshot_id: &str) -> Result<String, EditorError> {
        let receipt = self.gateway.revert(path, snapshot_id).await?;
        info!(path, from = snapshot_id, snapshot_id = %receipt.snapshot_id, "document reverted");

        if self.document.as_ref().is_some_and(|doc| doc.path == path) {
            if let Err(e) = self.reload(path).await {
                warn!(path, error = %e, "failed to reload reverted document");
            }
        }
        Ok(receipt.snapshot_id)
    }

    /// Replace the buffer with the stored content of `path`, discarding local
    /// edits.
    async fn reload(&mut self, path: &str) -> Result<(), EditorError> {
        let file = self.gateway.read_file(path).await?;
        self.document = Some(FileDocument::open(file.path, file.content));
        self.refresh_snapshots().await?;
        Ok(())
    }

    /// Reload the snapshot list of the open document.
    pub async fn refresh_snapshots(&mut self) -> Result<&[Snapshot], EditorError> {
        let Some(doc) = &self.document else {
            self.snapshots.clear();
            return Ok(&self.snapshots);
        };
        let list = self.gateway.list_snapshots(&doc.path).await?;
        self.snapshots = list.snapshots;
        Ok(&self.snapshots)
    }

    /// Refresh after a successful write; a failure here only leaves the list
    /// stale.
    async fn refresh_snapshots_logged(&mut self) {
        if let Err(e) = self.refresh_snapshots().await {
            warn!(error = %e, "failed to refresh snapshot list");
        }
    }
}
