//! Exclusive build scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quire_config::BuildPolicy;
use quire_site::{BuildError, BuildReport, Builder};
use tokio::sync::Mutex;

/// Result of a build request that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The builder ran to completion.
    Built(BuildReport),
    /// Another build was in flight and the request was shed.
    Skipped,
}

/// Build request failure.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("build task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Runs the builder with at most one build in flight.
///
/// Clones share the same lock.
#[derive(Clone)]
pub struct BuildCoordinator {
    builder: Arc<dyn Builder>,
    lock: Arc<Mutex<()>>,
    policy: BuildPolicy,
    generation: Arc<AtomicUsize>,
}

impl BuildCoordinator {
    #[must_use]
    pub fn new(builder: Arc<dyn Builder>, policy: BuildPolicy) -> Self {
        Self {
            builder,
            lock: Arc::new(Mutex::new(())),
            policy,
            generation: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of builds started so far.
    #[must_use]
    pub fn builds_started(&self) -> usize {
        self.generation.load(Ordering::Relaxed)
    }

    /// Run one build.
    ///
    /// With [`BuildPolicy::Serialize`] the call waits for an in-flight build;
    /// with [`BuildPolicy::Shed`] it returns [`BuildOutcome::Skipped`] instead.
    pub async fn trigger_build(&self, reason: &str) -> Result<BuildOutcome, TriggerError> {
        let guard = match self.policy {
            BuildPolicy::Serialize => Arc::clone(&self.lock).lock_owned().await,
            BuildPolicy::Shed => {
                if let Ok(guard) = Arc::clone(&self.lock).try_lock_owned() {
                    guard
                } else {
                    tracing::debug!(reason, "Build already running, request shed");
                    return Ok(BuildOutcome::Skipped);
                }
            }
        };

        let build = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(reason, build, "Build started");
        let builder = Arc::clone(&self.builder);
        // The guard moves into the blocking task, so a caller that stops
        // waiting does not release the lock before the build ends.
        let report = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            builder.build()
        })
        .await??;
        tracing::info!(
            reason,
            build,
            pages = report.pages,
            elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
            "Rebuilt site"
        );
        Ok(BuildOutcome::Built(report))
    }
}
