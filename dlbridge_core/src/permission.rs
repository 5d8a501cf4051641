use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BridgeError;

/// The kinds of authorization a download may need before it can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    WriteExternalStorage,
    ReadExternalStorage,
    PostNotifications,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionKind::WriteExternalStorage => "write-external-storage",
            PermissionKind::ReadExternalStorage => "read-external-storage",
            PermissionKind::PostNotifications => "post-notifications",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Granted,
    Denied,
}

/// The external permission subsystem.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// True when no request is needed at all (already granted, or not
    /// required on this platform).
    fn is_satisfied(&self, kind: PermissionKind) -> bool;

    /// Ask once. Resolves when the user (or policy) decides.
    async fn request_authorization(&self, kind: PermissionKind) -> PermissionDecision;
}

/// What `check_and_proceed` did synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// `proceed` already ran with `Ok(())`.
    Proceeded,
    /// A request is outstanding; `proceed` runs when it resolves.
    Pending,
}

/// One-shot authorization check in front of the download start.
#[derive(Clone)]
pub struct PermissionGate {
    authorizer: Arc<dyn Authorizer>,
}

impl PermissionGate {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }

    /// Run `proceed` with `Ok(())` right away if `kind` is already satisfied,
    /// otherwise request it and run `proceed` with the outcome later.
    ///
    /// A denial is reported as [`BridgeError::PermissionDenied`]; the request
    /// is never repeated automatically.
    pub fn check_and_proceed<F>(&self, kind: PermissionKind, proceed: F) -> GateOutcome
    where
        F: FnOnce(Result<(), BridgeError>) + Send + 'static,
    {
        if self.authorizer.is_satisfied(kind) {
            log::debug!("[permission] {} already satisfied", kind);
            proceed(Ok(()));
            return GateOutcome::Proceeded;
        }

        let authorizer = Arc::clone(&self.authorizer);
        tokio::spawn(async move {
            match authorizer.request_authorization(kind).await {
                PermissionDecision::Granted => {
                    log::info!("[permission] {} granted", kind);
                    proceed(Ok(()));
                }
                PermissionDecision::Denied => {
                    log::warn!("[permission] {} denied", kind);
                    proceed(Err(BridgeError::PermissionDenied(kind)));
                }
            }
        });
        GateOutcome::Pending
    }
}
