/// Unified error handling module
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or HTTP-level failure, including non-2xx statuses
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not have the expected JSON shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no schedule matching ID={0}")]
    NotFound(i64),

    /// Trigger expression lacks its `/T` time separator
    #[error("malformed trigger expression '{0}': could not find timestamp identifier")]
    MalformedExpression(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Prefix the message with context, keeping the variant intact
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            SyncError::Transport(msg) => SyncError::Transport(format!("{ctx}: {msg}")),
            SyncError::MalformedResponse(msg) => {
                SyncError::MalformedResponse(format!("{ctx}: {msg}"))
            }
            SyncError::Config(msg) => SyncError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SyncError::Transport(format!(
                "request failed with HTTP code {}: {}",
                status.as_u16(),
                err
            )),
            None => SyncError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedResponse(err.to_string())
    }
}

/// Type alias for synchronization results
pub type SyncResult<T> = Result<T, SyncError>;
