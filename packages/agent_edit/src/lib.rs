//! Agent edit sessions for a writing client.
//!
//! This crate owns the client side of AI-assisted editing: it keeps one
//! reconnecting WebSocket channel to the agent, turns the agent's streamed
//! events into a single session record, works out which span of the document
//! an instruction targets, and commits accepted edits through the document
//! store so every AI change becomes a snapshot that can be reverted.
//!
//! It has no UI knowledge. A front end owns an [`EditorSession`], drives it
//! from one task, and renders [`AgentSession`] however it likes.
//!
//! # Example
//!
//! ```no_run
//! use agent_edit::{
//!     ConnectionEvent, ConnectionManager, EditorSession, HttpGateway, ReconnectPolicy, Selection,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = HttpGateway::new("http://localhost:8000");
//!     let (connection, events) =
//!         ConnectionManager::new("ws://localhost:8000/ws/agent", ReconnectPolicy::default());
//!     let mut editor = EditorSession::new(gateway, connection, events);
//!     editor.init();
//!
//!     editor.open("welcome.md").await?;
//!     editor.connection().wait_connected().await;
//!     editor.submit("Make it friendlier", Selection::caret(0))?;
//!
//!     while let Some(event) = editor.next_event().await {
//!         if let ConnectionEvent::Agent(event) = event {
//!             println!("{event:?}");
//!         }
//!         if editor.session().ready().is_some() {
//!             editor.apply().await?;
//!             break;
//!         }
//!     }
//!
//!     editor.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod document;
pub mod editor;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod selection;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use connection::{Backoff, ConnectionEvent, ConnectionManager, ConnectionState, ReconnectPolicy};
pub use document::FileDocument;
pub use editor::EditorSession;
pub use error::{EditorError, GatewayError, SubmitError};
pub use gateway::{
    Actor, FileContent, FileInfo, FileWrite, HttpGateway, Snapshot, SnapshotList, VersionGateway,
    WriteReceipt,
};
pub use protocol::{AgentEvent, ClientMessage, EditRequest, Selection};
pub use selection::resolve_target;
pub use session::{AgentSession, AgentSessionMachine, ReadyEdit};
