//! Agent Wire Protocol
//!
//! JSON text frames exchanged over the `/ws/agent` socket. The client sends a
//! single message kind (`edit`); the agent answers with a stream of `log` and
//! `delta` frames terminated by `result` or `error`.
//!
//! Frames carry no request identifier, so only one edit can be in flight per
//! connection.

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;
use crate::selection::resolve_target;

/// Character span inside a document, in Unicode scalar offsets.
///
/// `from == to` is a caret with nothing highlighted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub from: usize,
    pub to: usize,
}

impl Selection {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    pub fn caret(at: usize) -> Self {
        Self { from: at, to: at }
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }
}

/// One edit instruction, frozen at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub path: String,
    pub content: String,
    pub selection: Selection,
    pub instruction: String,
}

impl EditRequest {
    /// Validate the inputs and resolve the target span.
    ///
    /// The instruction is trimmed; an empty instruction or path is rejected.
    /// The selection goes through [`resolve_target`], so the stored span always
    /// satisfies `from <= to <= content length`.
    pub fn build(
        path: &str,
        content: &str,
        selection: Selection,
        instruction: &str,
    ) -> Result<Self, SubmitError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SubmitError::EmptyInstruction);
        }
        if path.is_empty() {
            return Err(SubmitError::NoDocument);
        }
        Ok(Self {
            path: path.to_string(),
            content: content.to_string(),
            selection: resolve_target(content, selection),
            instruction: instruction.to_string(),
        })
    }
}

/// Messages sent from client to agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Edit { request: EditRequest },
}

/// Messages sent from agent to client.
///
/// Every field of `Result` and `Error` is optional on the wire; defaults are
/// applied by the session state machine, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Log {
        message: String,
    },
    Delta {
        text: String,
    },
    Result {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patched_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Delta { .. } => "delta",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }
}

/// Parse one inbound text frame. Unparseable or unknown frames yield `None`.
pub fn parse_agent_event(frame: &str) -> Option<AgentEvent> {
    serde_json::from_str(frame).ok()
}
