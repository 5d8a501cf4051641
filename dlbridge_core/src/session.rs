use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::DownloadEngine;
use crate::error::EngineError;
use crate::extras::Extras;
use crate::types::{SessionId, Status};
use crate::view::last_path_segment;

/// Deterministic identifier for a (locator, destination) pair.
///
/// Stable across runs so a persisted record is found again for the same draft.
pub fn session_id_for(locator: &str, destination: &str) -> SessionId {
    fn string_hash(s: &str) -> i32 {
        s.encode_utf16()
            .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
    }
    string_hash(locator)
        .wrapping_mul(31)
        .wrapping_add(string_hash(destination))
}

/// A locally built session descriptor, not yet acknowledged by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub id: SessionId,
    pub locator: String,
    pub destination: String,
    /// Ordered, duplicate-free.
    pub tags: Vec<String>,
    pub extras: Extras,
    pub download_on_enqueue: bool,
}

impl SessionRequest {
    pub fn new(locator: impl Into<String>, destination: impl Into<String>) -> Self {
        let locator = locator.into();
        let destination = destination.into();
        Self {
            id: session_id_for(&locator, &destination),
            locator,
            destination,
            tags: Vec::new(),
            extras: Extras::new(),
            download_on_enqueue: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.clear();
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    pub fn with_extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn with_download_on_enqueue(mut self, start: bool) -> Self {
        self.download_on_enqueue = start;
        self
    }

    /// Treat the draft as a session until the engine hands back the canonical one.
    pub fn to_draft_session(&self) -> Session {
        Session {
            id: self.id,
            locator: self.locator.clone(),
            destination: self.destination.clone(),
            tags: self.tags.clone(),
            extras: self.extras.clone(),
            status: Status::None,
        }
    }
}

/// The engine's canonical record of an enqueued download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub locator: String,
    pub destination: String,
    pub tags: Vec<String>,
    /// Metadata snapshot at enqueue time.
    pub extras: Extras,
    pub status: Status,
}

impl Session {
    pub fn file_name(&self) -> &str {
        last_path_segment(&self.destination)
    }
}

/// Drives `enqueue` against the engine without blocking the caller.
#[derive(Clone)]
pub struct SessionLauncher {
    engine: Arc<dyn DownloadEngine>,
}

impl SessionLauncher {
    pub fn new(engine: Arc<dyn DownloadEngine>) -> Self {
        Self { engine }
    }

    /// Enqueue `request` and deliver the canonical session (or the failure)
    /// to `on_result` once the engine acknowledges it.
    ///
    /// The returned session may carry a different id than the draft when the
    /// engine deduplicated against an existing record.
    pub fn enqueue<F>(&self, request: SessionRequest, on_result: F)
    where
        F: FnOnce(Result<Session, EngineError>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let draft_id = request.id;
            let result = engine.enqueue(request).await;
            match &result {
                Ok(session) if session.id != draft_id => log::info!(
                    "[session] draft {} resolved to existing session {}",
                    draft_id,
                    session.id
                ),
                Ok(session) => log::debug!("[session] enqueued {}", session.id),
                Err(e) => log::debug!("[session] enqueue of {} failed: {}", draft_id, e),
            }
            on_result(result);
        });
    }
}
