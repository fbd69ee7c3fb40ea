//! Agent session state machine.
//!
//! A client has exactly one [`AgentSession`]. It moves
//! `Idle -> Streaming -> Ready -> Idle` on the happy path; an `error` event
//! moves it to `Error` from anywhere, and the user can dismiss any non-idle
//! session back to `Idle`.
//!
//! ```text
//!            submit               result              apply
//!   Idle ───────────▶ Streaming ─────────▶ Ready ─────────▶ Idle
//!    ▲                  │  ▲ log/delta       │
//!    │      close       │  └─────────┘       │ close
//!    └──────────────────┴────────────────────┘
//!                 error (from any state) ──▶ Error ── close ──▶ Idle
//! ```

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SubmitError;
use crate::protocol::{AgentEvent, ClientMessage, EditRequest};

pub const DEFAULT_SUMMARY: &str = "Done";
pub const DEFAULT_ERROR_MESSAGE: &str = "Agent error";

/// A finished edit waiting for the user to accept or dismiss it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyEdit {
    /// Document the request was built from.
    pub path: String,
    pub diff: String,
    pub patched: String,
    pub summary: String,
    pub instruction: String,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentSession {
    #[default]
    Idle,
    Streaming {
        path: String,
        draft: String,
        log: Vec<String>,
        instruction: String,
    },
    Ready(ReadyEdit),
    Error {
        message: String,
    },
}

impl AgentSession {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming { .. } => "streaming",
            Self::Ready(_) => "ready",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn ready(&self) -> Option<&ReadyEdit> {
        match self {
            Self::Ready(edit) => Some(edit),
            _ => None,
        }
    }

    /// Draft text streamed so far (empty outside `Streaming`).
    pub fn draft(&self) -> &str {
        match self {
            Self::Streaming { draft, .. } => draft,
            _ => "",
        }
    }

    pub fn log(&self) -> &[String] {
        match self {
            Self::Streaming { log, .. } => log,
            Self::Ready(edit) => &edit.log,
            _ => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Owner of the single session record.
///
/// All transitions go through here so the invariants hold in one place:
/// only one session at a time, `diff`/`patched`/`summary` are set only when
/// a streaming session receives its result, and a ready edit is handed out
/// at most once.
#[derive(Debug, Default)]
pub struct AgentSessionMachine {
    session: AgentSession,
}

impl AgentSessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn ready(&self) -> Option<&ReadyEdit> {
        self.session.ready()
    }

    /// Check that a new submission would be accepted.
    pub fn ensure_idle(&self) -> Result<(), SubmitError> {
        if self.session.is_idle() {
            Ok(())
        } else {
            Err(SubmitError::Busy {
                state: self.session.state_name(),
            })
        }
    }

    /// Start streaming for `request` and return the frame to send.
    ///
    /// Rejected unless the session is idle, so an in-flight session is never
    /// disturbed by a second submission.
    pub fn submit(&mut self, request: &EditRequest) -> Result<ClientMessage, SubmitError> {
        self.ensure_idle()?;
        if request.instruction.trim().is_empty() {
            return Err(SubmitError::EmptyInstruction);
        }
        if request.path.is_empty() {
            return Err(SubmitError::NoDocument);
        }

        self.session = AgentSession::Streaming {
            path: request.path.clone(),
            draft: String::new(),
            log: Vec::new(),
            instruction: request.instruction.clone(),
        };
        Ok(ClientMessage::Edit {
            request: request.clone(),
        })
    }

    /// Fold one inbound event into the session.
    pub fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Log { message } => self.on_log(message),
            AgentEvent::Delta { text } => match &mut self.session {
                AgentSession::Streaming { draft, .. } => draft.push_str(&text),
                other => debug!(state = other.state_name(), "dropping delta outside streaming"),
            },
            AgentEvent::Result {
                diff,
                patched_content,
                summary,
                path: result_path,
            } => {
                if !self.session.is_streaming() {
                    debug!(state = self.session.state_name(), "dropping result outside streaming");
                    return;
                }
                let AgentSession::Streaming {
                    path,
                    log,
                    instruction,
                    ..
                } = std::mem::take(&mut self.session)
                else {
                    return;
                };
                // The request's path wins; an implicit session only has the result's.
                let path = match result_path {
                    Some(result_path) if path.is_empty() => result_path,
                    Some(result_path) if result_path != path => {
                        warn!(request = %path, result = %result_path, "result names a different document");
                        path
                    }
                    _ => path,
                };
                self.session = AgentSession::Ready(ReadyEdit {
                    path,
                    diff: diff.unwrap_or_default(),
                    patched: patched_content.unwrap_or_default(),
                    summary: summary.unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
                    instruction,
                    log,
                });
            }
            AgentEvent::Error { message } => {
                self.session = AgentSession::Error {
                    message: message.unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                };
            }
        }
    }

    fn on_log(&mut self, message: String) {
        match &mut self.session {
            AgentSession::Streaming { log, .. } => log.push(message),
            AgentSession::Ready(edit) => edit.log.push(message),
            AgentSession::Idle => {
                // Kept for compatibility with agents that log before the
                // client has submitted; likely a stale frame from an
                // abandoned session.
                warn!("log event while idle; opening an implicit streaming session");
                self.session = AgentSession::Streaming {
                    path: String::new(),
                    draft: String::new(),
                    log: vec![message],
                    instruction: String::new(),
                };
            }
            AgentSession::Error { .. } => debug!("dropping log after error"),
        }
    }

    /// Dismiss the current session. Returns `false` if it was already idle.
    ///
    /// Dismissing a streaming session only stops local updates; nothing is
    /// sent to the agent.
    pub fn close(&mut self) -> bool {
        if self.session.is_streaming() {
            debug!("abandoning in-flight agent session");
        }
        !std::mem::take(&mut self.session).is_idle()
    }

    /// Consume a ready edit, returning the session to idle.
    ///
    /// No-op unless the session is exactly `Ready`.
    pub fn apply(&mut self) -> Option<ReadyEdit> {
        if !matches!(self.session, AgentSession::Ready(_)) {
            return None;
        }
        match std::mem::take(&mut self.session) {
            AgentSession::Ready(edit) => Some(edit),
            _ => None,
        }
    }
}
