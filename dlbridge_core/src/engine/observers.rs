use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{Notification, SessionId};

use super::{DownloadObserver, ObserverHandle};

/// Per-session fan-out of notifications to registered observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<HashMap<SessionId, Vec<Arc<dyn DownloadObserver>>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Vec<Arc<dyn DownloadObserver>>>> {
        // A panicking observer must not wedge every later notification.
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false if this handle is already registered for `id`.
    pub fn add(&self, id: SessionId, observer: Arc<dyn DownloadObserver>) -> bool {
        let mut observers = self.lock();
        let list = observers.entry(id).or_default();
        if list.iter().any(|o| o.handle() == observer.handle()) {
            return false;
        }
        list.push(observer);
        true
    }

    /// Returns false if nothing was registered under `handle`.
    pub fn remove(&self, id: SessionId, handle: ObserverHandle) -> bool {
        let mut observers = self.lock();
        let Some(list) = observers.get_mut(&id) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| o.handle() != handle);
        let removed = list.len() != before;
        if list.is_empty() {
            observers.remove(&id);
        }
        removed
    }

    pub fn count(&self, id: SessionId) -> usize {
        self.lock().get(&id).map_or(0, Vec::len)
    }

    /// Deliver to one observer only (used for the attach replay).
    pub fn notify_one(&self, observer: &Arc<dyn DownloadObserver>, notification: Notification) {
        observer.on_changed(notification);
    }

    /// Deliver `notification` to every observer of its session.
    pub fn notify(&self, notification: &Notification) {
        self.notify_session(notification.id, notification);
    }

    /// Deliver `notification` to every observer registered under `id`.
    ///
    /// The list is cloned first so observers run without the lock held.
    pub fn notify_session(&self, id: SessionId, notification: &Notification) {
        let targets: Vec<Arc<dyn DownloadObserver>> = match self.lock().get(&id) {
            Some(list) => list.clone(),
            None => return,
        };
        for observer in targets {
            observer.on_changed(notification.clone());
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
