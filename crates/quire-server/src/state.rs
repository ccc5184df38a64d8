//! Application state.
//!
//! Shared state for all request handlers.

use std::sync::Arc;

use crate::live_reload::NotificationRegistry;

/// Shared application state.
pub(crate) struct AppState {
    /// Slots of connected live reload clients.
    pub registry: Arc<NotificationRegistry>,
}
