//! Lifecycle observer bridge.
//!
//! Owns the presentation context's subscription to one session and turns the
//! notifications it receives into [`ViewState`]s. The bridge never touches the
//! engine's notification thread directly: the registered observer only hands
//! each notification to a [`NotificationForwarder`], which the owning context
//! uses to marshal it back onto its own task before calling
//! [`ObserverBridge::accept`].
//!
//! | From       | Call          | To                      |
//! |------------|---------------|-------------------------|
//! | `Detached` | `attach(id)`  | `Attached { id, .. }`   |
//! | `Attached` | `attach(id)`  | unchanged (same id)     |
//! | `Attached` | `attach(new)` | `Attached { new, .. }`  |
//! | `Attached` | `detach()`    | `Detached`              |

use std::sync::Arc;

use crate::engine::{DownloadEngine, DownloadObserver, ObserverHandle};
use crate::types::{DownloadFailure, Notification, Reason, SessionId, Status};
use crate::view::{format_eta, format_throughput, last_path_segment, ErrorBanner, ProgressLabel, ViewState};

/// Hands a notification, tagged with the registration it arrived on, to the
/// owning context.
pub type NotificationForwarder = Arc<dyn Fn(ObserverHandle, Notification) + Send + Sync>;

struct ForwardingObserver {
    handle: ObserverHandle,
    forward: NotificationForwarder,
}

impl DownloadObserver for ForwardingObserver {
    fn handle(&self) -> ObserverHandle {
        self.handle
    }

    fn on_changed(&self, notification: Notification) {
        (self.forward)(self.handle, notification);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Detached,
    Attached {
        session_id: SessionId,
        handle: ObserverHandle,
    },
}

/// Result of applying one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeUpdate {
    pub view: ViewState,
    /// The notification reported `Completed`.
    pub completed: bool,
    pub failure: Option<DownloadFailure>,
}

pub struct ObserverBridge {
    engine: Arc<dyn DownloadEngine>,
    forward: NotificationForwarder,
    attachment: Attachment,
    view: ViewState,
}

impl ObserverBridge {
    pub fn new(engine: Arc<dyn DownloadEngine>, forward: NotificationForwarder) -> Self {
        Self {
            engine,
            forward,
            attachment: Attachment::Detached,
            view: ViewState::default(),
        }
    }

    pub fn attachment(&self) -> Attachment {
        self.attachment
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.attachment, Attachment::Attached { .. })
    }

    pub fn attached_session(&self) -> Option<SessionId> {
        match self.attachment {
            Attachment::Attached { session_id, .. } => Some(session_id),
            Attachment::Detached => None,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Subscribe to `session_id`, replacing any subscription to another id.
    ///
    /// Attaching to the id already attached is a no-op, so at most one
    /// registration is ever live. Returns true if a new registration was made.
    pub fn attach(&mut self, session_id: SessionId) -> bool {
        if let Attachment::Attached { session_id: current, .. } = self.attachment {
            if current == session_id {
                log::debug!("[bridge] already attached to {}", session_id);
                return false;
            }
            self.detach();
        }

        let handle = ObserverHandle::new();
        let observer = Arc::new(ForwardingObserver {
            handle,
            forward: Arc::clone(&self.forward),
        });
        if let Err(e) = self.engine.observe(session_id, observer) {
            log::warn!("[bridge] could not observe {}: {}", session_id, e);
            return false;
        }

        self.attachment = Attachment::Attached { session_id, handle };
        if self.view.session_id != Some(session_id) {
            self.view = ViewState {
                session_id: Some(session_id),
                ..ViewState::default()
            };
        }
        log::debug!("[bridge] attached to {}", session_id);
        true
    }

    /// Drop the current subscription. The download itself keeps running.
    pub fn detach(&mut self) -> bool {
        let Attachment::Attached { session_id, handle } = self.attachment else {
            return false;
        };
        self.attachment = Attachment::Detached;
        if let Err(e) = self.engine.unobserve(session_id, handle) {
            log::debug!("[bridge] unobserve of {} failed: {}", session_id, e);
        }
        log::debug!("[bridge] detached from {}", session_id);
        true
    }

    /// Apply a notification that arrived on registration `handle`.
    ///
    /// Discarded (returns `None`) while detached, when it came in on a
    /// registration that has since been replaced, or when it concerns any
    /// session other than the attached one.
    pub fn accept(&mut self, handle: ObserverHandle, notification: Notification) -> Option<BridgeUpdate> {
        let Attachment::Attached {
            session_id,
            handle: current,
        } = self.attachment
        else {
            log::trace!("[bridge] detached, dropping notification for {}", notification.id);
            return None;
        };
        if handle != current {
            log::debug!("[bridge] dropping notification from a stale registration");
            return None;
        }
        if notification.id != session_id {
            log::debug!(
                "[bridge] dropping notification for {} while tracking {}",
                notification.id,
                session_id
            );
            return None;
        }

        self.view = project(&self.view, &notification);
        Some(BridgeUpdate {
            view: self.view.clone(),
            completed: notification.status == Status::Completed,
            failure: notification.error,
        })
    }

    pub fn set_banner(&mut self, banner: Option<ErrorBanner>) {
        self.view.error_banner = banner;
    }
}

/// Next view state after `notification`, starting from `previous`.
///
/// The title only moves on `DownloadQueued`/`DownloadCompleted`; the banner is
/// left to the retry handler.
pub fn project(previous: &ViewState, notification: &Notification) -> ViewState {
    let title_text = match notification.reason {
        Reason::DownloadQueued | Reason::DownloadCompleted => {
            last_path_segment(&notification.file).to_string()
        }
        _ => previous.title_text.clone(),
    };
    ViewState {
        session_id: Some(notification.id),
        title_text,
        progress_text: ProgressLabel::for_status(notification.status, notification.progress).to_string(),
        eta_text: format_eta(notification.eta_ms),
        throughput_text: format_throughput(notification.bytes_per_second),
        error_banner: previous.error_banner.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::engine::memory::MemoryEngine;
    use crate::engine::DownloadRecord;
    use crate::session::SessionRequest;

    fn notification(id: SessionId, status: Status, progress: i32, reason: Reason) -> Notification {
        Notification {
            id,
            url: "http://x/movie.mp4".into(),
            file: "/movies/movie.mp4".into(),
            status,
            progress,
            eta_ms: -1,
            bytes_per_second: -1,
            error: None,
            reason,
        }
    }

    fn bridge_with_inbox(engine: Arc<MemoryEngine>) -> (ObserverBridge, Arc<Mutex<Vec<(ObserverHandle, Notification)>>>) {
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        let forward: NotificationForwarder = Arc::new(move |handle, n| sink.lock().unwrap().push((handle, n)));
        (ObserverBridge::new(engine, forward), inbox)
    }

    fn seeded_engine(request: &SessionRequest) -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new("bridge-test"));
        engine.seed(DownloadRecord::from_request(request)).unwrap();
        engine
    }

    #[test]
    fn title_moves_only_on_queued_or_completed() {
        let start = ViewState {
            title_text: "old".into(),
            ..ViewState::default()
        };
        let progress = project(&start, &notification(7, Status::Downloading, 50, Reason::DownloadProgressChanged));
        assert_eq!(progress.title_text, "old");
        assert_eq!(progress.progress_text, "50%");

        let queued = project(&start, &notification(7, Status::Queued, 0, Reason::DownloadQueued));
        assert_eq!(queued.title_text, "movie.mp4");
        assert_eq!(queued.progress_text, "queued");

        let done = project(&progress, &notification(7, Status::Completed, 100, Reason::DownloadCompleted));
        assert_eq!(done.title_text, "movie.mp4");
        assert_eq!(done.progress_text, "100%");
    }

    #[test]
    fn progress_labels_cover_every_status() {
        let v = ViewState::default();
        let label = |status, progress| {
            project(&v, &notification(1, status, progress, Reason::Reporting)).progress_text
        };
        assert_eq!(label(Status::Downloading, -1), "downloading");
        assert_eq!(label(Status::Completed, -1), "downloading");
        assert_eq!(label(Status::Downloading, 42), "42%");
        assert_eq!(label(Status::Added, 3), "added");
        assert_eq!(label(Status::Paused, 42), "unknown");
        assert_eq!(label(Status::Failed, 10), "unknown");
    }

    #[test]
    fn eta_and_throughput_are_projected() {
        let mut n = notification(1, Status::Downloading, 10, Reason::DownloadProgressChanged);
        n.eta_ms = 125_000;
        n.bytes_per_second = 1500;
        let v = project(&ViewState::default(), &n);
        assert_eq!(v.eta_text, "2m 5s left");
        assert_eq!(v.throughput_text, "1.5 kb/s");
    }

    #[test]
    fn banner_survives_projection() {
        let start = ViewState {
            error_banner: Some(ErrorBanner {
                session_id: 1,
                message: "boom".into(),
            }),
            ..ViewState::default()
        };
        let v = project(&start, &notification(1, Status::Queued, 0, Reason::DownloadQueued));
        assert!(v.error_banner.is_some());
    }

    #[test]
    fn attach_replays_current_state_once() {
        let request = SessionRequest::new("http://x/movie.mp4", "/movies/movie.mp4");
        let engine = seeded_engine(&request);
        let (mut bridge, inbox) = bridge_with_inbox(Arc::clone(&engine));

        assert!(bridge.attach(request.id));
        assert!(!bridge.attach(request.id));
        assert_eq!(engine.observer_count(request.id), 1);

        let delivered = inbox.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.reason, Reason::ObserverAttached);
    }

    #[test]
    fn foreign_and_stale_notifications_are_dropped() {
        let request = SessionRequest::new("http://x/movie.mp4", "/movies/movie.mp4");
        let engine = seeded_engine(&request);
        let (mut bridge, _inbox) = bridge_with_inbox(Arc::clone(&engine));
        bridge.attach(request.id);
        let Attachment::Attached { handle, .. } = bridge.attachment() else {
            panic!("not attached");
        };

        let foreign = notification(request.id.wrapping_add(1), Status::Downloading, 10, Reason::DownloadProgressChanged);
        assert!(bridge.accept(handle, foreign).is_none());

        let ours = notification(request.id, Status::Downloading, 10, Reason::DownloadProgressChanged);
        assert!(bridge.accept(ObserverHandle::new(), ours.clone()).is_none());
        assert_eq!(bridge.view().progress_text, "");

        let update = bridge.accept(handle, ours).unwrap();
        assert_eq!(update.view.progress_text, "10%");
        assert!(!update.completed);

        bridge.detach();
        assert_eq!(engine.observer_count(request.id), 0);
        let late = notification(request.id, Status::Completed, 100, Reason::DownloadCompleted);
        assert!(bridge.accept(handle, late).is_none());
    }

    #[test]
    fn switching_sessions_detaches_the_old_one() {
        let first = SessionRequest::new("http://x/a", "/d/a");
        let second = SessionRequest::new("http://x/b", "/d/b");
        let engine = seeded_engine(&first);
        engine.seed(DownloadRecord::from_request(&second)).unwrap();
        let (mut bridge, _inbox) = bridge_with_inbox(Arc::clone(&engine));

        bridge.attach(first.id);
        bridge.attach(second.id);
        assert_eq!(engine.observer_count(first.id), 0);
        assert_eq!(engine.observer_count(second.id), 1);
        assert_eq!(bridge.attached_session(), Some(second.id));
        assert_eq!(bridge.view().session_id, Some(second.id));
    }
}
