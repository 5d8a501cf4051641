use thiserror::Error;

use crate::permission::PermissionKind;
use crate::types::SessionId;

/// Failures reported by a download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{namespace} store is closed")]
    Closed { namespace: String },

    #[error("download {0} does not exist")]
    NotFound(SessionId),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("disk I/O error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failures local to the presentation context.
///
/// None of these terminate the context; see [`crate::screen::DownloadScreen`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("permission {0} not enabled")]
    PermissionDenied(PermissionKind),

    #[error("enqueue failed: {0}")]
    EnqueueFailed(#[source] EngineError),

    #[error("extras write failed: {0}")]
    ExtrasWriteFailed(#[source] EngineError),

    #[error("presentation context is closed")]
    ContextClosed,
}
