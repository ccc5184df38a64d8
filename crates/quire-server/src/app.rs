//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::live_reload::{self, WEBSOCKET_PATH};
use crate::state::AppState;
use crate::static_files;

/// Create the application router.
///
/// The WebSocket handler reads the peer address, so the router must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub(crate) fn create_router(state: Arc<AppState>, output_dir: &Path) -> Router {
    Router::new()
        .route(WEBSOCKET_PATH, get(live_reload::ws_handler))
        .merge(static_files::static_router(output_dir))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
