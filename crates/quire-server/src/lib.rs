//! Development server for quire.
//!
//! Serves the output directory over HTTP, rebuilds the site whenever the
//! content or template tree changes, and tells every connected browser to
//! reload once the new output is in place.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use quire_server::{run_server, server_config_from_quire_config};
//! use quire_site::{SiteBuilder, SiteConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = quire_config::Config::load(None, None).unwrap();
//!     let server_config = server_config_from_quire_config(&config);
//!     let builder = Arc::new(SiteBuilder::new(SiteConfig {
//!         content_dir: server_config.content_dir.clone(),
//!         templates_dir: server_config.templates_dir.clone(),
//!         output_dir: server_config.output_dir.clone(),
//!         static_dir: config.dirs.static_dir.clone(),
//!     }));
//!
//!     run_server(server_config, builder).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum server (quire-server)
//!                        │
//!                        ├─► /websocket ──► registry slot per client
//!                        │                        ▲
//!                        │                        │ broadcast
//!                        │                        │
//!                        │   DevLoop: watch ─► debounce ─► build ─► inject
//!                        │
//!                        └─► everything else ──► ServeDir(output)
//! ```

mod app;
mod inject;
mod live_reload;
mod state;
mod static_files;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quire_config::{BuildErrorPolicy, BuildPolicy, DeliveryMode};
use quire_site::Builder;
use state::AppState;
use tokio::sync::watch;
use tokio::task::JoinError;

pub use inject::{InjectError, InjectReport, InjectWalkError, RELOAD_SCRIPT, inject_all, inject_reload_script};
pub use live_reload::{
    BroadcastReport, BuildCoordinator, BuildOutcome, ChangeEvent, ChangeKind, ChangeWatcher, DevLoop,
    DevLoopConfig, LoopError, LoopState, NotificationRegistry, RELOAD_MESSAGE, RegistryError, Slot,
    SlotSignal, TriggerError, WEBSOCKET_PATH, WatchError, WatchSet,
};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    pub host: String,
    /// Markdown content tree (watched).
    pub content_dir: PathBuf,
    /// Template directory (watched).
    pub templates_dir: PathBuf,
    /// Generated site (served).
    pub output_dir: PathBuf,
    /// Quiet period between a change and the rebuild.
    pub debounce: Duration,
    /// Reload signal delivery mode.
    pub delivery: DeliveryMode,
    /// Per-client delivery bound in blocking mode.
    pub delivery_timeout: Option<Duration>,
    /// Handling of overlapping build requests.
    pub build_policy: BuildPolicy,
    /// Reaction to failed rebuilds.
    pub on_build_error: BuildErrorPolicy,
    /// How long in-flight HTTP responses may take after shutdown starts.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    fn dev_loop_config(&self) -> DevLoopConfig {
        DevLoopConfig {
            content_dir: self.content_dir.clone(),
            templates_dir: self.templates_dir.clone(),
            output_dir: self.output_dir.clone(),
            debounce: self.debounce,
            on_build_error: self.on_build_error,
        }
    }
}

/// Dev server failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("initial build failed: {0}")]
    InitialBuild(#[source] LoopError),

    #[error("failed to bind {host}: {source}")]
    Bind {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] io::Error),

    #[error("live reload stopped: {0}")]
    Loop(#[source] LoopError),

    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// Run the dev server until Ctrl-C or a fatal error.
///
/// # Errors
///
/// Returns an error if the initial build fails, the listener can't be
/// bound, or the live reload loop stops on a fatal error.
pub async fn run_server(config: ServerConfig, builder: Arc<dyn Builder>) -> Result<(), ServerError> {
    serve(config, builder, shutdown_signal()).await
}

/// Run the dev server until `shutdown` resolves or a fatal error occurs.
///
/// # Errors
///
/// See [`run_server`].
pub async fn serve(
    config: ServerConfig,
    builder: Arc<dyn Builder>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    let registry = Arc::new(NotificationRegistry::new(config.delivery, config.delivery_timeout));
    let coordinator = BuildCoordinator::new(builder, config.build_policy);
    let dev_loop = DevLoop::new(config.dev_loop_config(), coordinator, Arc::clone(&registry));

    dev_loop.initial_build().await.map_err(ServerError::InitialBuild)?;

    let listener = tokio::net::TcpListener::bind(config.host.as_str())
        .await
        .map_err(|source| ServerError::Bind {
            host: config.host.clone(),
            source,
        })?;
    match listener.local_addr() {
        Ok(addr) => tracing::info!(address = %addr, "Starting server"),
        Err(_) => tracing::info!(host = %config.host, "Starting server"),
    }

    let (stop, stopped) = watch::channel(false);
    let mut loop_task = tokio::spawn(dev_loop.run(stopped.clone()));

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
    });
    let app = app::create_router(state, &config.output_dir);
    let mut server_stop = stopped;
    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = server_stop.wait_for(|stop| *stop).await;
        });
    let mut server_task = tokio::spawn(server.into_future());

    let mut loop_done = false;
    let mut server_done = false;
    let mut result = tokio::select! {
        () = shutdown => Ok(()),
        joined = &mut loop_task => {
            loop_done = true;
            loop_outcome(joined)
        }
        served = &mut server_task => {
            server_done = true;
            server_outcome(served)
        }
    };

    stop.send_replace(true);
    let closed = registry.close_all();
    tracing::debug!(clients = closed, "Closed live reload connections");

    if !server_done {
        match tokio::time::timeout(config.shutdown_grace, &mut server_task).await {
            Ok(served) => result = result.and(server_outcome(served)),
            Err(_) => {
                tracing::warn!(
                    grace = ?config.shutdown_grace,
                    "Server did not stop within grace period"
                );
                server_task.abort();
            }
        }
    }
    if !loop_done {
        result = result.and(loop_outcome(loop_task.await));
    }

    tracing::info!("Server stopped");
    result
}

fn loop_outcome(joined: Result<Result<(), LoopError>, JoinError>) -> Result<(), ServerError> {
    joined?.map_err(ServerError::Loop)
}

fn server_outcome(served: Result<io::Result<()>, JoinError>) -> Result<(), ServerError> {
    served?.map_err(ServerError::Serve)
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from quire config.
#[must_use]
pub fn server_config_from_quire_config(config: &quire_config::Config) -> ServerConfig {
    ServerConfig {
        host: config.server.host.clone(),
        content_dir: config.dirs.content_dir.clone(),
        templates_dir: config.dirs.templates_dir.clone(),
        output_dir: config.dirs.output_dir.clone(),
        debounce: config.live_reload.debounce(),
        delivery: config.live_reload.delivery,
        delivery_timeout: config.live_reload.delivery_timeout(),
        build_policy: config.live_reload.build_policy,
        on_build_error: config.live_reload.on_build_error,
        shutdown_grace: config.server.shutdown_grace(),
    }
}
