use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a single call against the central store.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote transient failure (HTTP {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("remote rejected request: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("malformed remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and 5xx are worth retrying; any other status is a rejection
    /// that will not succeed on replay.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => RemoteError::Transient { status, message },
            _ => RemoteError::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store as a whole cannot be used right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// One record could not be read or written; the rest of the store is fine.
    #[error("record {id}: {message}")]
    Record { id: String, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl StoreError {
    pub fn record(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StoreError::Record {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Whether this failure should abort an entire table pass rather than
    /// skip the one record it concerns.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Record { .. } => false,
            StoreError::Remote(e) => !e.is_permanent(),
        }
    }
}

impl From<StoreError> for RemoteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Remote(inner) => inner,
            StoreError::Unavailable(msg) => RemoteError::Unreachable(msg),
            StoreError::Record { id, message } => RemoteError::Rejected {
                status: None,
                message: format!("record {id}: {message}"),
            },
        }
    }
}
