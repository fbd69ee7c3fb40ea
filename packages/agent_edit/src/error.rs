//! Error types for the gateway, session submission and the editor.

/// Failure talking to the document store.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("document store is unavailable")]
    Unavailable,

    #[error("document store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Http(reqwest::Error),

    #[error("malformed response from document store: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }

    /// HTTP status code, when the store answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why an edit instruction was not sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("instruction is empty")]
    EmptyInstruction,

    #[error("no document is open")]
    NoDocument,

    #[error("an agent session is already {state}")]
    Busy { state: &'static str },

    #[error("agent channel is not connected")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("no document is open")]
    NoDocument,
}
