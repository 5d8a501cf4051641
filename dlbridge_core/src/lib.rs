//! Drives one download through a [`engine::DownloadEngine`] and reflects its
//! lifecycle in a presentation context.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod extras;
pub mod extras_accessor;
pub mod permission;
pub mod retry;
pub mod screen;
pub mod session;
pub mod types;
pub mod view;

pub use error::{BridgeError, EngineError};
pub use extras::{ExtraValue, Extras};
pub use screen::{DownloadScreen, ScreenConfig, ScreenHandle, ScreenRenderer};
pub use types::{Notification, Reason, SessionId, Status};
