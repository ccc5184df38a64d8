//! Live reload: rebuild on change and tell connected browsers.

mod coordinator;
mod dev_loop;
mod registry;
mod watcher;
mod websocket;

pub use coordinator::{BuildCoordinator, BuildOutcome, TriggerError};
pub use dev_loop::{DevLoop, DevLoopConfig, LoopError, LoopState};
pub use registry::{BroadcastReport, NotificationRegistry, RegistryError, Slot, SlotSignal};
pub use watcher::{ChangeEvent, ChangeKind, ChangeWatcher, WatchError, WatchSet};
pub(crate) use websocket::ws_handler;

/// Path of the live reload WebSocket endpoint.
pub const WEBSOCKET_PATH: &str = "/websocket";

/// Text frame telling the browser to reload.
pub const RELOAD_MESSAGE: &str = "reload";
