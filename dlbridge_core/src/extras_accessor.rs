use std::sync::Arc;

use crate::engine::DownloadEngine;
use crate::error::BridgeError;
use crate::extras::{ExtraValue, Extras};
use crate::types::SessionId;

/// Fire-and-forget access to the extras the engine keeps for each session.
///
/// Every operation is a single request to the engine; nothing is read,
/// modified and written back locally. The outcome is delivered to the
/// callback from an engine task.
#[derive(Clone)]
pub struct ExtrasAccessor {
    engine: Arc<dyn DownloadEngine>,
}

impl ExtrasAccessor {
    pub fn new(engine: Arc<dyn DownloadEngine>) -> Self {
        Self { engine }
    }

    /// Set one key, leaving the others in place.
    pub fn write<F>(&self, id: SessionId, key: impl Into<String>, value: impl Into<ExtraValue>, on_result: F)
    where
        F: FnOnce(Result<Extras, BridgeError>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let key = key.into();
        let value = value.into();
        tokio::spawn(async move {
            log::debug!("[extras] {} <- {}={}", id, key, value);
            let result = engine
                .write_extras(id, key, value)
                .await
                .map_err(BridgeError::ExtrasWriteFailed);
            on_result(result);
        });
    }

    /// Replace the whole mapping of `id` with `extras`.
    pub fn write_bulk<F>(&self, id: SessionId, extras: Extras, on_result: F)
    where
        F: FnOnce(Result<Extras, BridgeError>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            log::debug!("[extras] {} <- {} key(s), replacing", id, extras.len());
            let result = engine
                .write_extras_bulk(id, extras)
                .await
                .map_err(BridgeError::ExtrasWriteFailed);
            on_result(result);
        });
    }

    /// Remove `key` from each of `ids`. Ids without a record are skipped.
    pub fn delete_by_key<F>(&self, ids: Vec<SessionId>, key: impl Into<String>, on_result: F)
    where
        F: FnOnce(Result<Vec<SessionId>, BridgeError>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let key = key.into();
        tokio::spawn(async move {
            log::debug!("[extras] deleting {} from {:?}", key, ids);
            let result = engine
                .delete_extras_by_key(ids, key)
                .await
                .map_err(BridgeError::ExtrasWriteFailed);
            on_result(result);
        });
    }
}
