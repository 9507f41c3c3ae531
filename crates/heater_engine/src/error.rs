use heater_core::{Seq, UrlError};
use thiserror::Error;

/// Failure of a store request or of a refresh pass.
///
/// Every variant is fatal to the pass that produced it. Messages never carry
/// credentials: URLs are formatted from credential-free values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeatError {
    #[error("store error: {message}")]
    Store { message: String },
    #[error("http status {status} from {url}: {reason}")]
    HttpStatus {
        status: u16,
        url: String,
        reason: String,
    },
    #[error("update_seq of {db} went backward from {previous} to {observed}")]
    Regression {
        db: String,
        previous: Seq,
        observed: Seq,
    },
    #[error("{db}/{ddoc} claims update_seq {ddoc_seq} but the database is at {db_seq}")]
    Consistency {
        db: String,
        ddoc: String,
        ddoc_seq: Seq,
        db_seq: Seq,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error("heater task ended abnormally: {0}")]
    TaskFailed(String),
}

impl HeatError {
    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// True for errors meaning the store's data cannot be trusted, as opposed
    /// to errors that a retry might clear.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Regression { .. } | Self::Consistency { .. })
    }

    /// True for timeouts and connection-level failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}
