use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure talking to the hosted assistant service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("assistant service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response from assistant service: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("assistant service error: {0}")]
    RemoteService(#[from] ServiceError),

    #[error("failed to upload {}: {reason}", path.display())]
    Upload { path: PathBuf, reason: String },

    #[error("failed to start conversation thread: {0}")]
    ThreadCreation(#[source] ServiceError),

    #[error("assistant gave no response")]
    NoResponse,

    #[error("failed to save answers to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("message is empty")]
    EmptyMessage,

    #[error("a run is already in progress on this thread")]
    RunInProgress,

    #[error("run did not finish within {waited:?}")]
    RunTimedOut { waited: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("cannot {operation} while session is {state}")]
    InvalidState { operation: &'static str, state: String },
}

pub type Result<T, E = FormError> = std::result::Result<T, E>;
