use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use dlbridge_core::permission::{Authorizer, PermissionDecision, PermissionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Treated as already granted; nobody is asked.
    Grant,
    Deny,
    /// Ask on the terminal; the next input line is the answer.
    Prompt,
}

/// Terminal stand-in for a platform permission dialog.
pub struct PromptAuthorizer {
    mode: PermissionMode,
    pending: Mutex<Option<oneshot::Sender<PermissionDecision>>>,
}

impl PromptAuthorizer {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            pending: Mutex::new(None),
        }
    }

    /// Use `line` as the answer to an outstanding request.
    ///
    /// Returns false if nothing is being asked, so the line is a command.
    pub fn answer(&self, line: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(tx) = pending else {
            return false;
        };
        let decision = match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => PermissionDecision::Granted,
            _ => PermissionDecision::Denied,
        };
        let _ = tx.send(decision);
        true
    }
}

#[async_trait]
impl Authorizer for PromptAuthorizer {
    fn is_satisfied(&self, _kind: PermissionKind) -> bool {
        self.mode == PermissionMode::Grant
    }

    async fn request_authorization(&self, kind: PermissionKind) -> PermissionDecision {
        match self.mode {
            PermissionMode::Grant => PermissionDecision::Granted,
            PermissionMode::Deny => PermissionDecision::Denied,
            PermissionMode::Prompt => {
                let (tx, rx) = oneshot::channel();
                *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
                println!("Allow {}? [y/N]", kind);
                // Dropped sender (shutdown) counts as a refusal.
                rx.await.unwrap_or(PermissionDecision::Denied)
            }
        }
    }
}
