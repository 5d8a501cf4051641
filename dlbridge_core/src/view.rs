use std::fmt;

use serde::Serialize;

use crate::types::{SessionId, Status};

/// Progress line shown for a `(status, progress)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressLabel {
    Queued,
    Added,
    /// Downloading with an unknown total.
    Downloading,
    Percent(i32),
    Unknown,
}

impl ProgressLabel {
    /// Total over every status; progress only matters for Downloading/Completed.
    pub fn for_status(status: Status, progress: i32) -> Self {
        match status {
            Status::Queued => ProgressLabel::Queued,
            Status::Added => ProgressLabel::Added,
            Status::Downloading | Status::Completed if progress == -1 => ProgressLabel::Downloading,
            Status::Downloading | Status::Completed => ProgressLabel::Percent(progress),
            _ => ProgressLabel::Unknown,
        }
    }
}

impl fmt::Display for ProgressLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressLabel::Queued => f.write_str("queued"),
            ProgressLabel::Added => f.write_str("added"),
            ProgressLabel::Downloading => f.write_str("downloading"),
            ProgressLabel::Percent(p) => write!(f, "{}%", p),
            ProgressLabel::Unknown => f.write_str("unknown"),
        }
    }
}

/// Error banner with a retry action for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub session_id: SessionId,
    pub message: String,
}

impl ErrorBanner {
    pub const ACTION_LABEL: &'static str = "Retry";

    pub fn text(&self) -> String {
        format!("Download Failed: ErrorCode: {}", self.message)
    }
}

/// Passive, non-fatal notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notice {
    PermissionNotEnabled,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PermissionNotEnabled => f.write_str("Permission not enabled"),
        }
    }
}

/// Render-ready projection of the latest notification for the tracked session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub session_id: Option<SessionId>,
    pub title_text: String,
    pub progress_text: String,
    pub eta_text: String,
    pub throughput_text: String,
    pub error_banner: Option<ErrorBanner>,
}

/// Last non-empty `/`-separated segment of a path or URL.
pub fn last_path_segment(path: &str) -> &str {
    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}

/// "5s left", "2m 3s left", "1h 0m 4s left"; empty when unknown.
pub fn format_eta(eta_ms: i64) -> String {
    if eta_ms < 0 {
        return String::new();
    }
    let total_secs = eta_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s left", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s left", minutes, seconds)
    } else {
        format!("{}s left", seconds)
    }
}

/// Human-readable throughput; empty when unknown.
pub fn format_throughput(bytes_per_second: i64) -> String {
    const KB: f64 = 1000.0;
    const MB: f64 = 1000.0 * 1000.0;

    if bytes_per_second < 0 {
        return String::new();
    }
    let b = bytes_per_second as f64;
    if b >= MB {
        format!("{:.2} mb/s", b / MB)
    } else if b >= KB {
        format!("{:.1} kb/s", b / KB)
    } else {
        format!("{} b/s", bytes_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_mapping() {
        assert_eq!(ProgressLabel::for_status(Status::Queued, 30).to_string(), "queued");
        assert_eq!(ProgressLabel::for_status(Status::Added, -1).to_string(), "added");
        assert_eq!(ProgressLabel::for_status(Status::Downloading, -1).to_string(), "downloading");
        assert_eq!(ProgressLabel::for_status(Status::Downloading, 42).to_string(), "42%");
        assert_eq!(ProgressLabel::for_status(Status::Completed, 100).to_string(), "100%");
        assert_eq!(ProgressLabel::for_status(Status::Completed, -1).to_string(), "downloading");
    }

    #[test]
    fn other_statuses_are_unknown() {
        for status in [
            Status::None,
            Status::Paused,
            Status::Cancelled,
            Status::Failed,
            Status::Removed,
            Status::Deleted,
        ] {
            assert_eq!(ProgressLabel::for_status(status, 50), ProgressLabel::Unknown);
        }
    }

    #[test]
    fn last_segment_of_paths_and_urls() {
        assert_eq!(last_path_segment("/movies/movie.mp4"), "movie.mp4");
        assert_eq!(last_path_segment("http://x/movie.mp4?sig=1"), "movie.mp4");
        assert_eq!(last_path_segment("/movies/"), "movies");
        assert_eq!(last_path_segment(""), "");
    }

    #[test]
    fn eta_text() {
        assert_eq!(format_eta(-1), "");
        assert_eq!(format_eta(5_400), "5s left");
        assert_eq!(format_eta(123_000), "2m 3s left");
        assert_eq!(format_eta(3_604_000), "1h 0m 4s left");
    }

    #[test]
    fn throughput_text() {
        assert_eq!(format_throughput(-1), "");
        assert_eq!(format_throughput(512), "512 b/s");
        assert_eq!(format_throughput(1_500), "1.5 kb/s");
        assert_eq!(format_throughput(2_346_000), "2.35 mb/s");
    }

    #[test]
    fn banner_text_includes_message() {
        let banner = ErrorBanner {
            session_id: 7,
            message: "Network unreachable".to_string(),
        };
        assert_eq!(banner.text(), "Download Failed: ErrorCode: Network unreachable");
    }
}
