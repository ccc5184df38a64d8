//! Watch, debounce, build, inject, notify.
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//! initial ─► Idle ─► Debouncing ─► Building ─► Injecting ─► Notifying
//!  build      │          │            │            │
//!             └──────────┴────────────┴────────────┴─► Stopped
//! ```
//!
//! Every trip back to `Idle` collects a fresh [`WatchSet`], so directories
//! created by the user since the last cycle are picked up.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quire_config::BuildErrorPolicy;
use tokio::sync::watch;
use tokio::task::JoinError;

use super::coordinator::{BuildCoordinator, BuildOutcome, TriggerError};
use super::registry::NotificationRegistry;
use super::watcher::{ChangeEvent, ChangeWatcher, WatchError, WatchSet};
use crate::inject::{InjectReport, InjectWalkError, inject_all};

/// Observable loop state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Watching for changes.
    Idle,
    /// A change arrived; waiting out the debounce window.
    Debouncing,
    Building,
    Injecting,
    Notifying,
    /// Terminal.
    Stopped,
}

/// Fatal dev loop failure.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("file watcher stopped unexpectedly")]
    WatcherClosed,

    #[error("build failed: {0}")]
    Build(#[source] TriggerError),

    #[error("failed to inject reload script: {0}")]
    Inject(#[from] InjectWalkError),

    #[error("reload script injection aborted: {0}")]
    InjectAborted(#[source] JoinError),
}

/// Directories and timing for the dev loop.
#[derive(Clone, Debug)]
pub struct DevLoopConfig {
    pub content_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Delay between the first change event and the rebuild.
    pub debounce: Duration,
    pub on_build_error: BuildErrorPolicy,
}

/// The rebuild loop driving live reload.
pub struct DevLoop {
    config: DevLoopConfig,
    coordinator: BuildCoordinator,
    registry: Arc<NotificationRegistry>,
    state: watch::Sender<LoopState>,
}

impl DevLoop {
    #[must_use]
    pub fn new(
        config: DevLoopConfig,
        coordinator: BuildCoordinator,
        registry: Arc<NotificationRegistry>,
    ) -> Self {
        Self {
            config,
            coordinator,
            registry,
            state: watch::Sender::new(LoopState::Building),
        }
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }

    /// Build and inject once, unconditionally.
    ///
    /// Any failure here is fatal whatever the build error policy says.
    pub async fn initial_build(&self) -> Result<(), LoopError> {
        self.set_state(LoopState::Building);
        self.coordinator
            .trigger_build("initial build")
            .await
            .map_err(LoopError::Build)?;
        self.set_state(LoopState::Injecting);
        self.inject().await?;
        Ok(())
    }

    /// Walk the output tree off the async workers.
    async fn inject(&self) -> Result<InjectReport, LoopError> {
        let output_dir = self.config.output_dir.clone();
        let report = tokio::task::spawn_blocking(move || inject_all(&output_dir))
            .await
            .map_err(LoopError::InjectAborted)??;
        Ok(report)
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped) or a
    /// fatal error occurs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), LoopError> {
        let result = self.watch_loop(&mut shutdown).await;
        self.set_state(LoopState::Stopped);
        match &result {
            Ok(()) => tracing::debug!("Dev loop stopped"),
            Err(err) => tracing::error!(error = %err, "Dev loop failed"),
        }
        result
    }

    async fn watch_loop(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), LoopError> {
        loop {
            let set = WatchSet::collect(&self.config.templates_dir, &self.config.content_dir)?;
            let mut watcher = ChangeWatcher::establish(&set)?;
            self.set_state(LoopState::Idle);

            let trigger = tokio::select! {
                () = cancelled(shutdown) => return Ok(()),
                event = watcher.next() => match event {
                    Some(Ok(change)) => change,
                    Some(Err(err)) => return Err(err.into()),
                    None => return Err(LoopError::WatcherClosed),
                },
            };

            self.set_state(LoopState::Debouncing);
            tracing::debug!(path = %trigger.path.display(), kind = ?trigger.kind, "Change detected");
            tokio::select! {
                () = cancelled(shutdown) => return Ok(()),
                () = tokio::time::sleep(self.config.debounce) => {}
            }
            // Events queued during the window belong to the same edit.
            drop(watcher);

            if self.cycle(&trigger, shutdown).await?.is_break() {
                return Ok(());
            }
        }
    }

    async fn cycle(
        &self,
        trigger: &ChangeEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ControlFlow<()>, LoopError> {
        self.set_state(LoopState::Building);
        let reason = trigger.path.display().to_string();
        let outcome = tokio::select! {
            () = cancelled(shutdown) => return Ok(ControlFlow::Break(())),
            outcome = self.coordinator.trigger_build(&reason) => outcome,
        };
        match outcome {
            Ok(BuildOutcome::Built(_)) => {}
            Ok(BuildOutcome::Skipped) => return Ok(ControlFlow::Continue(())),
            Err(err) => match self.config.on_build_error {
                BuildErrorPolicy::Continue => {
                    tracing::error!(trigger = %reason, error = %err, "Rebuild failed, serving previous output");
                    return Ok(ControlFlow::Continue(()));
                }
                BuildErrorPolicy::Stop => return Err(LoopError::Build(err)),
            },
        }

        self.set_state(LoopState::Injecting);
        self.inject().await?;

        self.set_state(LoopState::Notifying);
        let report = tokio::select! {
            () = cancelled(shutdown) => return Ok(ControlFlow::Break(())),
            report = self.registry.broadcast() => report,
        };
        tracing::info!(
            trigger = %reason,
            delivered = report.delivered,
            dropped = report.dropped,
            timed_out = report.timed_out,
            "Reload sent"
        );
        Ok(ControlFlow::Continue(()))
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::RELOAD_SCRIPT;
    use crate::live_reload::registry::SlotSignal;
    use pretty_assertions::assert_eq;
    use quire_config::{BuildPolicy, DeliveryMode};
    use quire_site::{BuildError, BuildReport, Builder, SiteBuilder, SiteConfig};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(10);
    const PAGE_TEMPLATE: &str =
        "<!DOCTYPE html><html><head><title>{{ page.title }}</title></head><body>{{ content }}</body></html>";

    /// Writes a single page and counts calls; can be switched to failing.
    struct FakeBuilder {
        output_dir: PathBuf,
        calls: AtomicUsize,
        fail: AtomicBool,
        /// Succeed but leave no output tree behind.
        vanish: AtomicBool,
    }

    impl Builder for FakeBuilder {
        fn build(&self) -> Result<BuildReport, BuildError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BuildError::UnknownContent(PathBuf::from("broken.md")));
            }
            if self.vanish.load(Ordering::SeqCst) {
                fs::remove_dir_all(&self.output_dir).unwrap();
                return Ok(BuildReport::default());
            }
            fs::create_dir_all(&self.output_dir).unwrap();
            fs::write(self.output_dir.join("index.html"), "<html><head></head></html>").unwrap();
            Ok(BuildReport::default())
        }
    }

    struct Site {
        _root: tempfile::TempDir,
        config: DevLoopConfig,
    }

    impl Site {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let base = root.path().canonicalize().unwrap();
            let config = DevLoopConfig {
                content_dir: base.join("content"),
                templates_dir: base.join("templates"),
                output_dir: base.join("output"),
                debounce: Duration::from_millis(100),
                on_build_error: BuildErrorPolicy::Continue,
            };
            fs::create_dir_all(&config.content_dir).unwrap();
            fs::create_dir_all(&config.templates_dir).unwrap();
            fs::write(config.templates_dir.join("page.html"), PAGE_TEMPLATE).unwrap();
            Self { _root: root, config }
        }

        fn content(&self, relative: &str) -> PathBuf {
            self.config.content_dir.join(relative)
        }

        fn output(&self, relative: &str) -> String {
            fs::read_to_string(self.config.output_dir.join(relative)).unwrap()
        }

        fn fake_builder(&self) -> Arc<FakeBuilder> {
            Arc::new(FakeBuilder {
                output_dir: self.config.output_dir.clone(),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                vanish: AtomicBool::new(false),
            })
        }

        fn site_builder(&self) -> Arc<SiteBuilder> {
            Arc::new(SiteBuilder::new(SiteConfig {
                content_dir: self.config.content_dir.clone(),
                templates_dir: self.config.templates_dir.clone(),
                output_dir: self.config.output_dir.clone(),
                static_dir: self.config.content_dir.with_file_name("static"),
            }))
        }

        fn dev_loop<B: Builder + 'static>(
            &self,
            builder: Arc<B>,
        ) -> (DevLoop, Arc<NotificationRegistry>) {
            let registry = Arc::new(NotificationRegistry::new(
                DeliveryMode::Blocking,
                Some(Duration::from_secs(5)),
            ));
            let coordinator = BuildCoordinator::new(builder, BuildPolicy::Serialize);
            let dev_loop = DevLoop::new(self.config.clone(), coordinator, Arc::clone(&registry));
            (dev_loop, registry)
        }
    }

    struct Running {
        state: watch::Receiver<LoopState>,
        stop: watch::Sender<bool>,
        task: JoinHandle<Result<(), LoopError>>,
    }

    impl Running {
        fn spawn(dev_loop: DevLoop) -> Self {
            let state = dev_loop.state();
            let (stop, shutdown) = watch::channel(false);
            let task = tokio::spawn(dev_loop.run(shutdown));
            Self { state, stop, task }
        }

        async fn idle(&mut self) {
            tokio::time::timeout(WAIT, self.state.wait_for(|s| *s == LoopState::Idle))
                .await
                .unwrap()
                .unwrap();
        }

        async fn finish(self) -> Result<(), LoopError> {
            tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
        }
    }

    fn write_page(path: &Path, body: &str) {
        fs::write(path, format!("---\ntemplateName: page\ntitle: A\n---\n{body}\n")).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_edit_rebuilds_and_notifies_once() {
        let site = Site::new();
        write_page(&site.content("a.md"), "# Hi");
        let (dev_loop, registry) = site.dev_loop(site.site_builder());

        dev_loop.initial_build().await.unwrap();
        let html = site.output("a.html");
        assert!(html.contains("<h1>Hi</h1>"), "{html}");
        assert_eq!(html.matches(RELOAD_SCRIPT).count(), 1);

        let client = registry.register("test-client").unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        write_page(&site.content("a.md"), "# Bye");

        let signal = tokio::time::timeout(WAIT, client.recv()).await.unwrap();
        assert_eq!(signal, SlotSignal::Reload);
        let html = site.output("a.html");
        assert!(html.contains("<h1>Bye</h1>"), "{html}");
        assert!(!html.contains("<h1>Hi</h1>"), "{html}");
        assert_eq!(html.matches(RELOAD_SCRIPT).count(), 1);

        let extra = tokio::time::timeout(Duration::from_millis(500), client.recv()).await;
        assert!(extra.is_err(), "unexpected second notification");

        running.stop.send_replace(true);
        running.finish().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_directory_watched_after_next_cycle() {
        let site = Site::new();
        let builder = site.fake_builder();
        let (dev_loop, registry) = site.dev_loop(Arc::clone(&builder));
        dev_loop.initial_build().await.unwrap();
        let client = registry.register("c").unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        fs::create_dir(site.content("drafts")).unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, client.recv()).await.unwrap(),
            SlotSignal::Reload
        );
        running.idle().await;

        fs::write(site.content("drafts/new.md"), "x").unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, client.recv()).await.unwrap(),
            SlotSignal::Reload
        );
        assert_eq!(builder.calls.load(Ordering::SeqCst), 3);

        running.stop.send_replace(true);
        running.finish().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_rebuild_keeps_running_without_notifying() {
        let site = Site::new();
        let builder = site.fake_builder();
        let (dev_loop, registry) = site.dev_loop(Arc::clone(&builder));
        dev_loop.initial_build().await.unwrap();
        let client = registry.register("c").unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        builder.fail.store(true, Ordering::SeqCst);
        fs::write(site.content("a.md"), "broken").unwrap();
        tokio::time::timeout(WAIT, async {
            while builder.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        running.idle().await;
        assert!(!client.try_recv());

        builder.fail.store(false, Ordering::SeqCst);
        fs::write(site.content("a.md"), "fixed").unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, client.recv()).await.unwrap(),
            SlotSignal::Reload
        );

        running.stop.send_replace(true);
        running.finish().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_policy_ends_loop_on_failed_rebuild() {
        let mut site = Site::new();
        site.config.on_build_error = BuildErrorPolicy::Stop;
        let builder = site.fake_builder();
        let (dev_loop, _registry) = site.dev_loop(Arc::clone(&builder));
        dev_loop.initial_build().await.unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        builder.fail.store(true, Ordering::SeqCst);
        fs::write(site.content("a.md"), "broken").unwrap();

        let state = running.state.clone();
        let err = running.finish().await.unwrap_err();
        assert!(matches!(err, LoopError::Build(TriggerError::Build(_))));
        assert_eq!(*state.borrow(), LoopState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_output_tree_after_rebuild_is_fatal() {
        let site = Site::new();
        let builder = site.fake_builder();
        let (dev_loop, _registry) = site.dev_loop(Arc::clone(&builder));
        dev_loop.initial_build().await.unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        builder.vanish.store(true, Ordering::SeqCst);
        fs::write(site.content("a.md"), "x").unwrap();

        let state = running.state.clone();
        let err = running.finish().await.unwrap_err();
        assert!(matches!(err, LoopError::Inject(_)), "{err:?}");
        assert_eq!(*state.borrow(), LoopState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_of_edits_rebuilds_once() {
        let site = Site::new();
        let builder = site.fake_builder();
        let (dev_loop, registry) = site.dev_loop(Arc::clone(&builder));
        dev_loop.initial_build().await.unwrap();
        let client = registry.register("c").unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        for i in 0..5 {
            fs::write(site.content(&format!("{i}.md")), "x").unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            tokio::time::timeout(WAIT, client.recv()).await.unwrap(),
            SlotSignal::Reload
        );
        running.idle().await;
        let extra = tokio::time::timeout(Duration::from_millis(500), client.recv()).await;
        assert!(extra.is_err(), "unexpected second notification");
        assert_eq!(builder.calls.load(Ordering::SeqCst), 2);

        running.stop.send_replace(true);
        running.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let site = Site::new();
        let (dev_loop, _registry) = site.dev_loop(site.fake_builder());
        dev_loop.initial_build().await.unwrap();
        let mut running = Running::spawn(dev_loop);
        running.idle().await;

        running.stop.send_replace(true);

        let state = running.state.clone();
        running.finish().await.unwrap();
        assert_eq!(*state.borrow(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_template_root_is_fatal() {
        let site = Site::new();
        let (dev_loop, _registry) = site.dev_loop(site.fake_builder());
        dev_loop.initial_build().await.unwrap();
        fs::remove_dir_all(&site.config.templates_dir).unwrap();

        let err = Running::spawn(dev_loop).finish().await.unwrap_err();

        assert!(matches!(err, LoopError::Watch(WatchError::Watch { .. })));
    }

    #[tokio::test]
    async fn test_initial_build_failure_is_fatal() {
        let site = Site::new();
        let builder = site.fake_builder();
        builder.fail.store(true, Ordering::SeqCst);
        let (dev_loop, _registry) = site.dev_loop(builder);

        let err = dev_loop.initial_build().await.unwrap_err();

        assert!(matches!(err, LoopError::Build(_)));
    }
}
