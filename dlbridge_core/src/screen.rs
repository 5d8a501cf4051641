//! The single-download screen.
//!
//! [`DownloadScreen`] owns every piece of presentation state (tracked session,
//! attachment, banner) and mutates it from one task only. Permission results,
//! enqueue acknowledgements, engine notifications and extras results are all
//! posted back to that task as events, so nothing in here needs a
//! lock.
//!
//! Control flow:
//!
//! ```text
//! run() -> permission gate -> enqueue (draft tracked, observer attached)
//!       -> canonical session (re-attach if the id changed)
//!       -> notifications -> view / completion mark / error banner
//!       -> teardown (detach)
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::{NotificationForwarder, ObserverBridge};
use crate::engine::{DownloadEngine, ObserverHandle};
use crate::error::{BridgeError, EngineError};
use crate::extras::Extras;
use crate::extras_accessor::ExtrasAccessor;
use crate::permission::{Authorizer, PermissionGate, PermissionKind};
use crate::retry::ErrorRetryHandler;
use crate::session::{Session, SessionLauncher, SessionRequest};
use crate::types::{Notification, SessionId};
use crate::view::{ErrorBanner, Notice, ViewState};

/// Extras key written once a download reports completion.
pub const COMPLETION_KEY: &str = "nathan_is_here";

pub const DEFAULT_TAG: &str = "bookmark-1";

/// Extras attached to every request unless the config overrides them.
pub fn sample_extras() -> Extras {
    let mut extras = Extras::new();
    extras
        .put_bool("testBoolean", true)
        .put_string("testString", "test")
        .put_float("testFloat", f32::from_bits(1))
        .put_double("testDouble", f64::from_bits(1))
        .put_int("testInt", i32::MAX)
        .put_long("testLong", i64::MAX);
    extras
}

#[derive(Debug, Clone)]
pub struct ScreenConfig {
    pub locator: String,
    pub destination: String,
    pub tags: Vec<String>,
    pub initial_extras: Extras,
    pub completion_key: String,
    pub permission: PermissionKind,
}

impl ScreenConfig {
    pub fn new(locator: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            destination: destination.into(),
            tags: vec![DEFAULT_TAG.to_string()],
            initial_extras: sample_extras(),
            completion_key: COMPLETION_KEY.to_string(),
            permission: PermissionKind::WriteExternalStorage,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_initial_extras(mut self, extras: Extras) -> Self {
        self.initial_extras = extras;
        self
    }

    pub fn with_completion_key(mut self, key: impl Into<String>) -> Self {
        self.completion_key = key.into();
        self
    }

    pub fn with_permission(mut self, kind: PermissionKind) -> Self {
        self.permission = kind;
        self
    }

    fn to_request(&self) -> SessionRequest {
        SessionRequest::new(&self.locator, &self.destination)
            .with_tags(self.tags.iter().cloned())
            .with_extras(self.initial_extras.clone())
            .with_download_on_enqueue(true)
    }
}

/// Output side of the screen. Called from the screen task; must not block.
pub trait ScreenRenderer: Send + Sync + 'static {
    fn render(&self, view: &ViewState);

    fn show_notice(&self, notice: Notice);

    fn show_banner(&self, banner: &ErrorBanner);

    fn dismiss_banner(&self);
}

enum ExtrasOp {
    CompletionMark(SessionId),
    DeleteKey { ids: Vec<SessionId>, key: String },
}

impl fmt::Display for ExtrasOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtrasOp::CompletionMark(id) => write!(f, "completion mark on {}", id),
            ExtrasOp::DeleteKey { ids, key } => write!(f, "delete {} from {:?}", key, ids),
        }
    }
}

enum ScreenEvent {
    PermissionResolved(Result<(), BridgeError>),
    Enqueued(Result<Session, EngineError>),
    Notified {
        handle: ObserverHandle,
        notification: Notification,
    },
    ExtrasDone {
        op: ExtrasOp,
        result: Result<(), BridgeError>,
    },
    VisibilityChanged(bool),
    RetryRequested,
    DeleteExtraRequested(String),
    Teardown,
}

/// Posts events back to the screen task without keeping it alive.
#[derive(Clone)]
struct Mailbox(mpsc::WeakUnboundedSender<ScreenEvent>);

impl Mailbox {
    fn post(&self, event: ScreenEvent) {
        match self.0.upgrade() {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => log::trace!("[screen] context gone, dropping event"),
        }
    }
}

/// Input side of the screen: what the surrounding UI drives.
///
/// The screen stops once every handle is dropped or `teardown` is called.
#[derive(Clone)]
pub struct ScreenHandle {
    tx: mpsc::UnboundedSender<ScreenEvent>,
}

impl ScreenHandle {
    fn send(&self, event: ScreenEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::ContextClosed)
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), BridgeError> {
        self.send(ScreenEvent::VisibilityChanged(visible))
    }

    /// The banner's retry action.
    pub fn retry(&self) -> Result<(), BridgeError> {
        self.send(ScreenEvent::RetryRequested)
    }

    /// Remove `key` from the tracked session's extras.
    pub fn delete_extra(&self, key: impl Into<String>) -> Result<(), BridgeError> {
        self.send(ScreenEvent::DeleteExtraRequested(key.into()))
    }

    pub fn teardown(&self) -> Result<(), BridgeError> {
        self.send(ScreenEvent::Teardown)
    }
}

/// State left behind by a finished screen.
#[derive(Debug, Clone)]
pub struct ScreenOutcome {
    pub tracked: Option<Session>,
    pub view: ViewState,
}

pub struct DownloadScreen {
    config: ScreenConfig,
    gate: PermissionGate,
    launcher: SessionLauncher,
    bridge: ObserverBridge,
    extras: ExtrasAccessor,
    retry: ErrorRetryHandler,
    renderer: Arc<dyn ScreenRenderer>,
    tracked: Option<Session>,
    visible: bool,
    mailbox: Mailbox,
    events: mpsc::UnboundedReceiver<ScreenEvent>,
}

impl DownloadScreen {
    /// Build a visible screen. Nothing happens until [`DownloadScreen::run`].
    ///
    /// The engine is borrowed, not owned: closing it is up to the caller.
    pub fn new(
        config: ScreenConfig,
        engine: Arc<dyn DownloadEngine>,
        authorizer: Arc<dyn Authorizer>,
        renderer: Arc<dyn ScreenRenderer>,
    ) -> (Self, ScreenHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let mailbox = Mailbox(tx.downgrade());

        let forward_to = mailbox.clone();
        let forward: NotificationForwarder = Arc::new(move |handle, notification| {
            forward_to.post(ScreenEvent::Notified { handle, notification });
        });

        let screen = Self {
            config,
            gate: PermissionGate::new(authorizer),
            launcher: SessionLauncher::new(Arc::clone(&engine)),
            bridge: ObserverBridge::new(Arc::clone(&engine), forward),
            extras: ExtrasAccessor::new(Arc::clone(&engine)),
            retry: ErrorRetryHandler::new(engine),
            renderer,
            tracked: None,
            visible: true,
            mailbox,
            events,
        };
        (screen, ScreenHandle { tx })
    }

    pub fn tracked(&self) -> Option<&Session> {
        self.tracked.as_ref()
    }

    pub fn view(&self) -> &ViewState {
        self.bridge.view()
    }

    /// Pass the permission gate, then process events until torn down.
    pub async fn run(mut self) -> ScreenOutcome {
        self.start();
        while let Some(event) = self.events.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        self.bridge.detach();
        self.retry.dismiss();
        log::info!("[screen] torn down");
        ScreenOutcome {
            tracked: self.tracked,
            view: self.bridge.view().clone(),
        }
    }

    fn start(&mut self) {
        let mailbox = self.mailbox.clone();
        self.gate.check_and_proceed(self.config.permission, move |result| {
            mailbox.post(ScreenEvent::PermissionResolved(result));
        });
    }

    /// Returns false once the screen should stop.
    fn handle(&mut self, event: ScreenEvent) -> bool {
        match event {
            ScreenEvent::PermissionResolved(Ok(())) => self.begin_download(),
            ScreenEvent::PermissionResolved(Err(e)) => {
                log::warn!("[screen] {}", e);
                self.renderer.show_notice(Notice::PermissionNotEnabled);
            }
            ScreenEvent::Enqueued(result) => self.on_enqueued(result),
            ScreenEvent::Notified { handle, notification } => self.on_notification(handle, notification),
            ScreenEvent::ExtrasDone { op, result } => match result {
                Ok(()) => log::debug!("[screen] {} done", op),
                Err(e) => log::warn!("[screen] {}: {}", op, e),
            },
            ScreenEvent::VisibilityChanged(visible) => self.set_visible(visible),
            ScreenEvent::RetryRequested => {
                if let Some(id) = self.retry.retry() {
                    log::info!("[screen] retrying {}", id);
                    self.bridge.set_banner(None);
                    self.renderer.dismiss_banner();
                }
            }
            ScreenEvent::DeleteExtraRequested(key) => self.delete_extra(key),
            ScreenEvent::Teardown => return false,
        }
        true
    }

    fn begin_download(&mut self) {
        let request = self.config.to_request();
        let draft = request.to_draft_session();
        log::info!("[screen] enqueueing {} -> {}", draft.locator, draft.destination);

        // Observe the draft id right away so the first notifications are not missed.
        if self.visible {
            self.bridge.attach(draft.id);
        }
        self.tracked = Some(draft);

        let mailbox = self.mailbox.clone();
        self.launcher.enqueue(request, move |result| {
            mailbox.post(ScreenEvent::Enqueued(result));
        });
    }

    fn on_enqueued(&mut self, result: Result<Session, EngineError>) {
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                log::warn!("[screen] {}", BridgeError::EnqueueFailed(e));
                return;
            }
        };
        let changed = self.tracked.as_ref().map(|s| s.id) != Some(session.id);
        if changed {
            log::info!("[screen] now tracking {}", session.id);
            // A banner raised for the draft would retry the wrong id.
            if self.retry.dismiss() {
                self.bridge.set_banner(None);
                self.renderer.dismiss_banner();
            }
        }
        let id = session.id;
        self.tracked = Some(session);
        if changed && self.visible {
            self.bridge.attach(id);
        }
    }

    fn on_notification(&mut self, handle: ObserverHandle, notification: Notification) {
        let id = notification.id;
        let Some(update) = self.bridge.accept(handle, notification) else {
            return;
        };

        let mut banner = None;
        if let Some(failure) = &update.failure {
            banner = self.retry.present(id, failure).cloned();
            if banner.is_some() {
                self.bridge.set_banner(banner.clone());
            }
        }
        self.renderer.render(self.bridge.view());
        if let Some(banner) = &banner {
            self.renderer.show_banner(banner);
        }

        if update.completed {
            self.mark_completed(id);
        }
    }

    fn mark_completed(&self, id: SessionId) {
        let mut marker = Extras::new();
        marker.put_bool(self.config.completion_key.clone(), true);
        let mailbox = self.mailbox.clone();
        self.extras.write_bulk(id, marker, move |result| {
            mailbox.post(ScreenEvent::ExtrasDone {
                op: ExtrasOp::CompletionMark(id),
                result: result.map(|_| ()),
            });
        });
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if !visible {
            self.bridge.detach();
            return;
        }
        if let Some(id) = self.tracked.as_ref().map(|s| s.id) {
            self.bridge.attach(id);
        }
    }

    fn delete_extra(&self, key: String) {
        let Some(id) = self.tracked.as_ref().map(|s| s.id) else {
            log::debug!("[screen] no session to delete {} from", key);
            return;
        };
        let ids = vec![id];
        let op = ExtrasOp::DeleteKey {
            ids: ids.clone(),
            key: key.clone(),
        };
        let mailbox = self.mailbox.clone();
        self.extras.delete_by_key(ids, key, move |result| {
            mailbox.post(ScreenEvent::ExtrasDone {
                op,
                result: result.map(|_| ()),
            });
        });
    }
}
