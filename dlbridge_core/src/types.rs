use serde::{Deserialize, Serialize};

/// Identifier of one tracked download.
pub type SessionId = i32;

/// Lifecycle status of a download as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    None,
    Queued,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
    Removed,
    Deleted,
    Added,
}

impl Status {
    /// Returns true if `retry` is allowed to re-drive the download.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Status::Failed | Status::Cancelled)
    }
}

/// Why a notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    ObserverAttached,
    DownloadAdded,
    DownloadQueued,
    DownloadStarted,
    DownloadProgressChanged,
    DownloadCompleted,
    DownloadError,
    DownloadPaused,
    DownloadResumed,
    DownloadCancelled,
    DownloadRemoved,
    DownloadDeleted,
    DownloadWaitingOnNetwork,
    Reporting,
}

/// Coarse classification of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Unknown,
    ConnectionTimedOut,
    NoNetworkConnection,
    RequestNotSuccessful,
    FileNotCreated,
    WriteFailed,
    EmptyResponse,
}

/// Server response captured when a request was not successful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub code: u16,
    /// Parsed response body, if the server sent JSON.
    pub error_body: Option<serde_json::Value>,
}

impl HttpResponse {
    pub fn new(code: u16, error_body: Option<serde_json::Value>) -> Self {
        Self { code, error_body }
    }

    /// The string `message` field of the JSON body, if there is one.
    pub fn message(&self) -> Option<&str> {
        self.error_body.as_ref()?.get("message")?.as_str()
    }
}

/// Terminal error attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFailure {
    pub kind: FailureKind,
    pub response: Option<HttpResponse>,
}

impl DownloadFailure {
    pub fn new(kind: FailureKind) -> Self {
        Self { kind, response: None }
    }

    pub fn with_response(kind: FailureKind, response: HttpResponse) -> Self {
        Self {
            kind,
            response: Some(response),
        }
    }

    /// Human-readable diagnostic extracted from the structured payload.
    ///
    /// `None` when the failure carries no response body or the body has no
    /// string `message` field.
    pub fn diagnostic(&self) -> Option<&str> {
        self.response.as_ref()?.message()
    }
}

/// One state-change update for a session, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: SessionId,
    pub url: String,
    pub file: String,
    pub status: Status,
    /// 0..=100, or -1 when the total size is unknown.
    pub progress: i32,
    /// Estimated time remaining in milliseconds, -1 when unknown.
    pub eta_ms: i64,
    /// Smoothed throughput, -1 when unknown.
    pub bytes_per_second: i64,
    pub error: Option<DownloadFailure>,
    pub reason: Reason,
}

/// Percent complete for `downloaded` of `total` bytes; -1 when `total` is unknown.
pub fn progress_percent(downloaded: i64, total: i64) -> i32 {
    if total < 1 {
        -1
    } else if downloaded < 1 {
        0
    } else if downloaded >= total {
        100
    } else {
        ((downloaded as f64 / total as f64) * 100.0) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_unknown_total() {
        assert_eq!(progress_percent(512, -1), -1);
        assert_eq!(progress_percent(0, 0), -1);
    }

    #[test]
    fn progress_clamps_to_hundred() {
        assert_eq!(progress_percent(0, 1000), 0);
        assert_eq!(progress_percent(420, 1000), 42);
        assert_eq!(progress_percent(2000, 1000), 100);
    }

    #[test]
    fn diagnostic_requires_string_message() {
        let with_message = DownloadFailure::with_response(
            FailureKind::RequestNotSuccessful,
            HttpResponse::new(503, Some(json!({ "message": "Network unreachable" }))),
        );
        assert_eq!(with_message.diagnostic(), Some("Network unreachable"));

        let numeric = DownloadFailure::with_response(
            FailureKind::RequestNotSuccessful,
            HttpResponse::new(500, Some(json!({ "message": 12 }))),
        );
        assert_eq!(numeric.diagnostic(), None);

        assert_eq!(DownloadFailure::new(FailureKind::WriteFailed).diagnostic(), None);
    }
}
