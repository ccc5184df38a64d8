//! Static file serving from the output directory.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Router serving the output tree; `index.html` answers directory requests.
pub(crate) fn static_router(output_dir: &Path) -> Router<Arc<AppState>> {
    Router::new().fallback_service(ServeDir::new(output_dir))
}
