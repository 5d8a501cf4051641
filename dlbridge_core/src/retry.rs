use std::sync::Arc;

use crate::engine::DownloadEngine;
use crate::types::{DownloadFailure, SessionId};
use crate::view::ErrorBanner;

/// Turns terminal download errors into a retryable banner.
pub struct ErrorRetryHandler {
    engine: Arc<dyn DownloadEngine>,
    banner: Option<ErrorBanner>,
}

impl ErrorRetryHandler {
    pub fn new(engine: Arc<dyn DownloadEngine>) -> Self {
        Self { engine, banner: None }
    }

    pub fn banner(&self) -> Option<&ErrorBanner> {
        self.banner.as_ref()
    }

    /// Show a banner for `failure` if it carries a server diagnostic.
    ///
    /// Failures without one are only logged and leave the current banner alone.
    pub fn present(&mut self, session_id: SessionId, failure: &DownloadFailure) -> Option<&ErrorBanner> {
        let Some(message) = failure.diagnostic() else {
            log::debug!(
                "[retry] download {} failed ({:?}) without a diagnostic",
                session_id,
                failure.kind
            );
            return None;
        };
        log::info!("[retry] download {} failed: {}", session_id, message);
        self.banner = Some(ErrorBanner {
            session_id,
            message: message.to_string(),
        });
        self.banner.as_ref()
    }

    /// Dismiss the banner and re-drive its session without waiting for the
    /// engine. Returns the retried id, or `None` when no banner was shown.
    pub fn retry(&mut self) -> Option<SessionId> {
        let banner = self.banner.take()?;
        let id = banner.session_id;
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match engine.retry(id).await {
                Ok(()) => log::debug!("[retry] retry of {} accepted", id),
                Err(e) => log::warn!("[retry] retry of {} failed: {}", id, e),
            }
        });
        Some(id)
    }

    pub fn dismiss(&mut self) -> bool {
        self.banner.take().is_some()
    }
}
