//! The download engine boundary.
//!
//! Everything the presentation core needs from a download engine goes
//! through [`DownloadEngine`]. Two implementations ship with the crate:
//!
//! - [`memory::MemoryEngine`]: in-process and scriptable. Notifications are
//!   pushed by the caller, which makes it the engine of choice for tests.
//! - [`http::HttpEngine`]: streams a single HTTP resource to disk with
//!   resume support.
//!
//! Both keep their records in a [`store::DownloadStore`] and fan
//! notifications out through an [`observers::ObserverRegistry`].

pub mod http;
pub mod memory;
pub mod observers;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::extras::{ExtraValue, Extras};
use crate::session::{Session, SessionRequest};
use crate::types::{Notification, SessionId};

pub use store::DownloadRecord;

/// Identity of one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(Uuid);

impl ObserverHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives notifications for the sessions it was registered against.
///
/// Called from engine tasks; implementations must not block.
pub trait DownloadObserver: Send + Sync + 'static {
    fn handle(&self) -> ObserverHandle;

    fn on_changed(&self, notification: Notification);
}

#[async_trait]
pub trait DownloadEngine: Send + Sync + 'static {
    /// Create (or find) the record for `request`. When `download_on_enqueue`
    /// is set the transfer starts immediately.
    async fn enqueue(&self, request: SessionRequest) -> Result<Session, EngineError>;

    /// Subscribe `observer` to `id`. If a record already exists its current
    /// state is delivered right away with reason `ObserverAttached`.
    fn observe(&self, id: SessionId, observer: Arc<dyn DownloadObserver>) -> Result<(), EngineError>;

    fn unobserve(&self, id: SessionId, handle: ObserverHandle) -> Result<(), EngineError>;

    /// Best effort: re-drive a failed or cancelled download.
    async fn retry(&self, id: SessionId) -> Result<(), EngineError>;

    async fn write_extras(
        &self,
        id: SessionId,
        key: String,
        value: ExtraValue,
    ) -> Result<Extras, EngineError>;

    /// Replace the whole extras mapping of `id`.
    async fn write_extras_bulk(&self, id: SessionId, extras: Extras) -> Result<Extras, EngineError>;

    /// Remove `key` from every listed session that exists. Returns the ids touched.
    async fn delete_extras_by_key(
        &self,
        ids: Vec<SessionId>,
        key: String,
    ) -> Result<Vec<SessionId>, EngineError>;

    async fn get(&self, id: SessionId) -> Result<Option<DownloadRecord>, EngineError>;

    /// Stop in-flight work and release resources. Records are kept.
    async fn close(&self);
}
