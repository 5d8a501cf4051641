//! In-process engine whose transfers are driven by the caller.
//!
//! Nothing is downloaded. `enqueue` creates the record and reports it as
//! added/queued; from then on the owner pushes progress, completion and
//! failures with [`MemoryEngine::emit`] and friends. Every call made through
//! the [`DownloadEngine`] trait is recorded so tests can assert on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::extras::{ExtraValue, Extras};
use crate::session::{Session, SessionRequest};
use crate::types::{DownloadFailure, Notification, Reason, SessionId, Status};

use super::observers::ObserverRegistry;
use super::store::{DownloadRecord, DownloadStore};
use super::{DownloadEngine, DownloadObserver, ObserverHandle};

/// Calls received through the engine trait, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineCalls {
    pub enqueued: Vec<SessionId>,
    pub retried: Vec<SessionId>,
    pub extras_writes: Vec<(SessionId, Extras)>,
    pub extras_deletes: Vec<(Vec<SessionId>, String)>,
}

pub struct MemoryEngine {
    store: Mutex<DownloadStore>,
    observers: ObserverRegistry,
    calls: Mutex<EngineCalls>,
    fail_enqueue: AtomicBool,
    fail_extras: AtomicBool,
}

impl MemoryEngine {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            store: Mutex::new(DownloadStore::new(namespace).with_file_exist_checks(false)),
            observers: ObserverRegistry::new(),
            calls: Mutex::new(EngineCalls::default()),
            fail_enqueue: AtomicBool::new(false),
            fail_extras: AtomicBool::new(false),
        }
    }

    fn store(&self) -> MutexGuard<'_, DownloadStore> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn calls_mut(&self) -> MutexGuard<'_, EngineCalls> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make every following `enqueue` fail.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Make every following extras operation fail.
    pub fn set_fail_extras(&self, fail: bool) {
        self.fail_extras.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> EngineCalls {
        self.calls_mut().clone()
    }

    pub fn observer_count(&self, id: SessionId) -> usize {
        self.observers.count(id)
    }

    /// Put a record in place before anything is enqueued, e.g. one left over
    /// from an earlier run that a new draft should deduplicate against.
    pub fn seed(&self, record: DownloadRecord) -> Result<(), EngineError> {
        self.store().insert(record).map(|_| ())
    }

    pub fn record(&self, id: SessionId) -> Option<DownloadRecord> {
        self.store().get(id).ok().flatten()
    }

    /// Move a record to `status` with `progress` percent and notify observers.
    ///
    /// `progress` of -1 leaves the total unknown.
    pub fn emit(
        &self,
        id: SessionId,
        status: Status,
        progress: i32,
        reason: Reason,
    ) -> Result<Notification, EngineError> {
        let record = self.store().modify(id, |r| {
            r.status = status;
            if progress < 0 {
                r.total = -1;
                r.downloaded = r.downloaded.max(0);
            } else {
                r.total = 100;
                r.downloaded = i64::from(progress.min(100));
            }
            if status != Status::Failed {
                r.error = None;
            }
        })?;
        let notification = record.to_notification(reason);
        self.observers.notify(&notification);
        Ok(notification)
    }

    /// Attach ETA and throughput figures to the next notifications of `id`.
    pub fn set_rates(&self, id: SessionId, eta_ms: i64, bytes_per_second: i64) -> Result<(), EngineError> {
        self.store()
            .modify(id, |r| {
                r.eta_ms = eta_ms;
                r.bytes_per_second = bytes_per_second;
            })
            .map(|_| ())
    }

    /// Fail a record with `failure` and notify observers.
    pub fn emit_failure(&self, id: SessionId, failure: DownloadFailure) -> Result<Notification, EngineError> {
        let record = self.store().modify(id, |r| {
            r.status = Status::Failed;
            r.error = Some(failure);
        })?;
        let notification = record.to_notification(Reason::DownloadError);
        self.observers.notify(&notification);
        Ok(notification)
    }

    /// Deliver `notification` to the observers of `target`, whatever id it
    /// carries. Lets tests push notifications for unrelated sessions.
    pub fn emit_to(&self, target: SessionId, notification: Notification) {
        self.observers.notify_session(target, &notification);
    }

    fn check_extras(&self) -> Result<(), EngineError> {
        if self.fail_extras.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("extras writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadEngine for MemoryEngine {
    async fn enqueue(&self, request: SessionRequest) -> Result<Session, EngineError> {
        self.calls_mut().enqueued.push(request.id);
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected(format!(
                "enqueue of {} refused",
                request.locator
            )));
        }

        let start = request.download_on_enqueue;
        let (record, inserted) = self.store().insert(DownloadRecord::from_request(&request))?;
        if inserted {
            self.observers.notify(&record.to_notification(Reason::DownloadAdded));
        }

        let record = if start && record.status != Status::Completed {
            let queued = self.store().modify(record.id, |r| {
                r.status = Status::Queued;
                r.error = None;
            })?;
            self.observers.notify(&queued.to_notification(Reason::DownloadQueued));
            queued
        } else {
            record
        };
        Ok(record.to_session())
    }

    fn observe(&self, id: SessionId, observer: Arc<dyn DownloadObserver>) -> Result<(), EngineError> {
        let current = self.store().get(id)?;
        if self.observers.add(id, Arc::clone(&observer)) {
            if let Some(record) = current {
                self.observers
                    .notify_one(&observer, record.to_notification(Reason::ObserverAttached));
            }
        }
        Ok(())
    }

    fn unobserve(&self, id: SessionId, handle: ObserverHandle) -> Result<(), EngineError> {
        self.observers.remove(id, handle);
        Ok(())
    }

    async fn retry(&self, id: SessionId) -> Result<(), EngineError> {
        self.calls_mut().retried.push(id);
        let record = self.store().get(id)?.ok_or(EngineError::NotFound(id))?;
        if !record.status.is_retryable() {
            log::debug!("[engine] retry of {} ignored in status {:?}", id, record.status);
            return Ok(());
        }
        let queued = self.store().modify(id, |r| {
            r.status = Status::Queued;
            r.error = None;
        })?;
        self.observers.notify(&queued.to_notification(Reason::DownloadQueued));
        Ok(())
    }

    async fn write_extras(
        &self,
        id: SessionId,
        key: String,
        value: ExtraValue,
    ) -> Result<Extras, EngineError> {
        let mut single = Extras::new();
        single.put(key.clone(), value.clone());
        self.calls_mut().extras_writes.push((id, single));
        self.check_extras()?;
        Ok(self.store().put_extra(id, key, value)?.extras)
    }

    async fn write_extras_bulk(&self, id: SessionId, extras: Extras) -> Result<Extras, EngineError> {
        self.calls_mut().extras_writes.push((id, extras.clone()));
        self.check_extras()?;
        Ok(self.store().replace_extras(id, extras)?.extras)
    }

    async fn delete_extras_by_key(
        &self,
        ids: Vec<SessionId>,
        key: String,
    ) -> Result<Vec<SessionId>, EngineError> {
        self.calls_mut().extras_deletes.push((ids.clone(), key.clone()));
        self.check_extras()?;
        let touched = self.store().delete_extra_by_key(&ids, &key)?;
        Ok(touched.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: SessionId) -> Result<Option<DownloadRecord>, EngineError> {
        self.store().get(id)
    }

    async fn close(&self) {
        self.observers.clear();
        self.store().close();
    }
}
