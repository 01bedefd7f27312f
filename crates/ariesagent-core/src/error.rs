//! Error types for Ariesagent

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session acquisition failed: {source}")]
    SessionAcquisition {
        #[source]
        source: Box<Error>,
    },

    #[error("session already active for this agent identity")]
    SessionBusy,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("requested group {referent} needs tails for {rev_reg_id} but no resolver was supplied")]
    MissingResolver { referent: String, rev_reg_id: String },

    #[error("incomplete disclosure, unresolved groups: {}", missing.join(", "))]
    IncompleteDisclosure { missing: Vec<String> },

    #[error("timed out after {waited_ms}ms waiting for {operation}")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{record} is in state {state}, cannot {operation}")]
    InvalidState {
        record: String,
        state: String,
        operation: String,
    },

    #[error("expected state {expected}, got {actual}")]
    UnexpectedState { expected: String, actual: String },

    #[error("tails resolution failed for {rev_reg_id}: {reason}")]
    TailsResolution { rev_reg_id: String, reason: String },

    #[error("library error: {operation} - {message}")]
    Library { operation: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl Error {
    pub fn session_acquisition(source: Error) -> Self {
        Self::SessionAcquisition {
            source: Box::new(source),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn library(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Library {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(
        record: impl Into<String>,
        state: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            record: record.into(),
            state: state.to_string(),
            operation: operation.into(),
        }
    }

    pub fn unexpected_state(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Self::UnexpectedState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn tails_resolution(rev_reg_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TailsResolution {
            rev_reg_id: rev_reg_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the session context itself could not be established.
    pub fn is_session_failure(&self) -> bool {
        matches!(self, Self::SessionAcquisition { .. } | Self::SessionBusy)
    }
}
