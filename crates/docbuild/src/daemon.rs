//! Daemon orchestrator: owns the lifecycle and wires the bus, debouncer,
//! queue, updater, webhook consumer, and scheduler together.
//!
//! `start` loads persisted state, starts the queue workers, and spawns
//! the background consumer loops in a tracked [`WorkerGroup`]; `stop`
//! unwinds everything bounded by a caller deadline. The build path runs
//! through [`OrchestratedBuilder`], which evaluates the skip guards and
//! the delta plan around the external site builder and persists the
//! fingerprints a successful build establishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::Config;
use crate::debounce::{BuildDebouncer, DebouncerOptions};
use crate::delta::{DeltaAnalyzer, RepoCheckout};
use crate::eventstore::{DEFAULT_RECENT_CAP, EventStore, RecentBuild};
use crate::events::{BuildNow, BuildRequested, RepoRemoved};
use crate::fingerprint::{collect_markdown_files, doc_files_hash};
use crate::health::{self, Health};
use crate::queue::{BuildQueue, BuildQueueConfig, Builder, EnqueueError, JobEventSink};
use crate::scheduler::Scheduler;
use crate::skip::{SkipEvaluator, write_report};
use crate::state::{FileStateStore, RepoStateAccess, SkipStateAccess, StateAccess, StateLifecycle};
use crate::types::{
    BuildJob, BuildOutcome, BuildReport, DeltaDecision, DiscoveryResult, JobPriority, JobType,
    Repository, generate_job_id,
};
use crate::updater::{RemoteHeadChecker, RepoSetProvider, RepoUpdater};
use crate::webhook::WebhookConsumer;
use crate::workers::WorkerGroup;

/// Daemon lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Discovery collaborator: enumerate repositories from configured forges.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover_all(&self, cancel: &CancellationToken) -> Result<DiscoveryResult>;
}

/// Cache of the last discovery result, for webhook matching and status
/// queries.
#[derive(Default)]
pub struct DiscoveryCache {
    inner: RwLock<Option<DiscoveryResult>>,
}

impl DiscoveryCache {
    pub fn set(&self, result: DiscoveryResult) {
        *self.inner.write().expect("discovery cache lock poisoned") = Some(result);
    }

    pub fn get(&self) -> Option<DiscoveryResult> {
        self.inner.read().expect("discovery cache lock poisoned").clone()
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.get().map(|r| r.repositories).unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.get().map(|r| r.errors.len()).unwrap_or(0)
    }
}

/// Wraps the external site builder with the core's pre- and post-build
/// obligations: skip guards before any destructive work, delta pruning,
/// and fingerprint persistence after success.
pub struct OrchestratedBuilder {
    inner: Arc<dyn Builder>,
    state: Arc<FileStateStore>,
}

impl OrchestratedBuilder {
    pub fn new(inner: Arc<dyn Builder>, state: Arc<FileStateStore>) -> Self {
        Self { inner, state }
    }

    fn persist_success(&self, config: &Config, job: &BuildJob, report: &BuildReport) {
        for repo in &job.metadata.repositories {
            self.state.ensure_repository_state(&repo.url);

            let dir = config.repo_workspace_dir(repo);
            match collect_markdown_files(&dir, &repo.effective_docs_paths()) {
                Ok(paths) => {
                    let hash = report
                        .repo_doc_hashes
                        .get(&repo.url)
                        .cloned()
                        .unwrap_or_else(|| doc_files_hash(&paths));
                    self.state.set_repo_document_count(&repo.url, paths.len());
                    self.state.set_repo_doc_file_paths(&repo.url, paths);
                    self.state.set_repo_doc_files_hash(&repo.url, &hash);
                }
                Err(err) => {
                    tracing::warn!(repo = %repo.url, %err, "failed to scan docs after build");
                }
            }
            self.state.increment_repo_build(&repo.url);
        }

        if report.doc_files_hash.is_empty() {
            let mut all_paths: Vec<String> = Vec::new();
            for url in self.state.repo_urls() {
                if let Some(paths) = self.state.repo_doc_file_paths(&url) {
                    all_paths.extend(paths);
                }
            }
            self.state.set_last_global_doc_files_hash(&doc_files_hash(all_paths));
        } else {
            self.state.set_last_global_doc_files_hash(&report.doc_files_hash);
        }
        self.state.set_last_config_hash(&config.config_hash());

        if let Err(err) = write_report(&config.output_dir(), report, self.state.as_ref()) {
            tracing::warn!(%err, "failed to write build report");
        }
        if let Err(err) = self.state.save() {
            tracing::warn!(%err, "failed to save daemon state");
        }

        if let Some(live_reload) = &job.metadata.live_reload {
            live_reload.notify_reload();
        }
    }
}

#[async_trait]
impl Builder for OrchestratedBuilder {
    async fn build(
        &self,
        cancel: &CancellationToken,
        job: &mut BuildJob,
    ) -> Result<BuildReport> {
        let Some(config) = job.metadata.config.clone() else {
            // Nothing to orchestrate without a config snapshot.
            return self.inner.build(cancel, job).await;
        };

        if config.build.skip_if_unchanged {
            let evaluator = SkipEvaluator::new(
                config.output_dir(),
                config.config_hash(),
                self.inner.version(),
                self.state.clone(),
            );
            if let Some(report) = evaluator.evaluate(&job.metadata.repositories)? {
                if let Err(err) = self.state.save() {
                    tracing::warn!(%err, "failed to save daemon state");
                }
                return Ok(report);
            }
        }

        let checkouts: Vec<RepoCheckout> = job
            .metadata
            .repositories
            .iter()
            .map(|repo| RepoCheckout {
                repo: repo.clone(),
                dir: config.repo_workspace_dir(repo),
            })
            .collect();
        let plan = DeltaAnalyzer::new(self.state.clone(), config.build.detect_deletions)
            .analyze(&checkouts)
            .context("delta analysis failed")?;
        if plan.decision == DeltaDecision::Partial {
            job.metadata
                .repositories
                .retain(|repo| plan.changed_repos.contains(&repo.url));
        }
        job.metadata.delta = Some(plan);

        let report = self.inner.build(cancel, job).await?;
        if !report.is_failed() && report.outcome != BuildOutcome::Canceled {
            self.persist_success(&config, job, &report);
        }
        Ok(report)
    }

    fn version(&self) -> String {
        self.inner.version()
    }
}

/// The long-running daemon core.
pub struct Daemon {
    config: RwLock<Arc<Config>>,
    bus: EventBus,
    queue: BuildQueue,
    state: Arc<FileStateStore>,
    event_store: Arc<EventStore>,
    head_checker: Arc<dyn RemoteHeadChecker>,
    discovery: Option<Arc<dyn Discovery>>,
    discovery_cache: Arc<DiscoveryCache>,
    workers: WorkerGroup,
    status: RwLock<DaemonStatus>,
    run_cancel: Mutex<Option<CancellationToken>>,
    discovery_running: AtomicBool,
}

impl Daemon {
    /// Wire the daemon from its collaborators. Validation failures here
    /// mean the daemon never starts.
    pub fn new(
        config: Config,
        builder: Arc<dyn Builder>,
        head_checker: Arc<dyn RemoteHeadChecker>,
        discovery: Option<Arc<dyn Discovery>>,
    ) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(FileStateStore::new(&config.state_dir()));
        let event_store = Arc::new(
            EventStore::open(&config.state_dir(), DEFAULT_RECENT_CAP)
                .context("failed to open event store")?,
        );

        let orchestrated = Arc::new(OrchestratedBuilder::new(builder, state.clone()));
        let queue = BuildQueue::new(
            orchestrated,
            BuildQueueConfig {
                max_size: config.daemon.sync.queue_size,
                worker_count: config.daemon.sync.concurrent_builds,
                retry: config.build.retry_policy(),
                ..BuildQueueConfig::default()
            },
            Some(event_store.clone() as Arc<dyn JobEventSink>),
        )?;

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            bus: EventBus::new(),
            queue,
            state,
            event_store,
            head_checker,
            discovery,
            discovery_cache: Arc::new(DiscoveryCache::default()),
            workers: WorkerGroup::new(),
            status: RwLock::new(DaemonStatus::Idle),
            run_cancel: Mutex::new(None),
            discovery_running: AtomicBool::new(false),
        })
    }

    /// Current config snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Swap in a new configuration and request a rebuild.
    pub fn update_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self.config.write().expect("config lock poisoned") = Arc::new(config);
        self.request_build("config reload");
        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        *self.status.read().expect("status lock poisoned")
    }

    fn set_status(&self, status: DaemonStatus) {
        *self.status.write().expect("status lock poisoned") = status;
        tracing::info!(?status, "daemon status changed");
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn queue(&self) -> &BuildQueue {
        &self.queue
    }

    pub fn discovery_cache(&self) -> &DiscoveryCache {
        &self.discovery_cache
    }

    /// Recent builds, from the authoritative event-store projection.
    pub fn recent_builds(&self) -> Vec<RecentBuild> {
        self.event_store.recent_builds()
    }

    /// Health snapshot for status surfaces.
    pub fn health(&self) -> Health {
        health::assess(
            self.queue.queued_count(),
            self.queue.running_count(),
            self.discovery_cache.error_count(),
            self.state.is_loaded(),
        )
    }

    /// Publish a manual build request.
    pub fn request_build(&self, reason: &str) {
        if let Err(err) = self.bus.publish(BuildRequested::with_reason(reason)) {
            tracing::warn!(%err, "failed to publish build request");
        }
    }

    /// The current repo set: explicit config, else cached discovery.
    fn repo_provider(self: &Arc<Self>) -> RepoSetProvider {
        let daemon = Arc::downgrade(self);
        Arc::new(move || {
            let Some(daemon) = daemon.upgrade() else {
                return Vec::new();
            };
            let config = daemon.config();
            if config.has_explicit_repos() {
                config.repositories.clone()
            } else {
                daemon.discovery_cache.repositories()
            }
        })
    }

    fn run_token(&self) -> CancellationToken {
        self.run_cancel
            .lock()
            .expect("run token lock poisoned")
            .clone()
            .unwrap_or_else(|| {
                let token = CancellationToken::new();
                token.cancel();
                token
            })
    }

    /// Start the daemon: load state, start workers, spawn consumers.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.set_status(DaemonStatus::Starting);

        // State load failures are not fatal; the next successful build
        // re-establishes every fingerprint.
        if let Err(err) = self.state.load() {
            tracing::warn!(%err, "failed to load daemon state, starting empty");
        }

        let run = CancellationToken::new();
        *self.run_cancel.lock().expect("run token lock poisoned") = Some(run.clone());

        self.queue.start();

        let config = self.config();

        // BuildNow consumer: turn coalesced triggers into queued jobs.
        {
            let (mut rx, subscription) = self.bus.subscribe::<BuildNow>(16)?;
            let daemon = self.clone();
            let cancel = run.clone();
            self.workers.spawn("build-now-consumer", async move {
                let _subscription = subscription;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        evt = rx.recv() => {
                            let Some(evt) = evt else { return };
                            daemon.enqueue_build(evt);
                        }
                    }
                }
            });
        }

        // Webhook consumer.
        {
            let consumer = WebhookConsumer::new(
                self.bus.clone(),
                self.repo_provider(),
                config.forges.clone(),
                config.daemon.build_debounce.webhook_immediate,
            );
            let (rx, subscription) = consumer.subscribe()?;
            let cancel = run.clone();
            self.workers.spawn("webhook-consumer", async move {
                let _subscription = subscription;
                consumer.run(cancel, rx).await;
            });
        }

        // RepoRemoved consumer: forward to state cleanup.
        {
            let (mut rx, subscription) = self.bus.subscribe::<RepoRemoved>(16)?;
            let daemon = self.clone();
            let cancel = run.clone();
            self.workers.spawn("repo-removed-consumer", async move {
                let _subscription = subscription;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        evt = rx.recv() => {
                            let Some(evt) = evt else { return };
                            tracing::info!(url = %evt.repo_url, "cleaning up state for removed repo");
                            daemon.state.remove_repository_state(&evt.repo_url);
                            if let Err(err) = daemon.state.save() {
                                tracing::warn!(%err, "failed to save daemon state");
                            }
                        }
                    }
                }
            });
        }

        // Build debouncer.
        {
            let queue = self.queue.clone();
            let debouncer = BuildDebouncer::new(
                self.bus.clone(),
                DebouncerOptions::new(
                    config.daemon.build_debounce.quiet_window,
                    config.daemon.build_debounce.max_delay,
                ),
                Arc::new(move || queue.is_build_running()),
            )?
            .with_job_id_allocator(Arc::new(generate_job_id));
            let (rx, subscription) = debouncer.subscribe()?;
            let cancel = run.clone();
            self.workers.spawn("build-debouncer", async move {
                let _subscription = subscription;
                debouncer.run(cancel, rx).await;
            });
        }

        // Repo updater.
        {
            let updater = RepoUpdater::new(
                self.bus.clone(),
                self.head_checker.clone(),
                self.repo_provider(),
            );
            let (rx, subscription) = updater.subscribe()?;
            let cancel = run.clone();
            self.workers.spawn("repo-updater", async move {
                let _subscription = subscription;
                updater.run(cancel, rx).await;
            });
        }

        // Sync scheduler.
        if let Some(spec) = config.daemon.sync.schedule.clone() {
            let scheduler = Scheduler::new(spec);
            let daemon = self.clone();
            let cancel = run.clone();
            self.workers.spawn("sync-scheduler", async move {
                let tick_daemon = daemon.clone();
                scheduler
                    .run(cancel, move || {
                        let daemon = tick_daemon.clone();
                        async move { daemon.scheduled_tick().await }
                    })
                    .await;
            });
        }

        self.set_status(DaemonStatus::Running);
        Ok(())
    }

    /// One scheduled sync tick.
    async fn scheduled_tick(self: Arc<Self>) {
        if self.status() != DaemonStatus::Running {
            return;
        }
        let config = self.config();

        if config.has_forges() && self.discovery.is_some() {
            self.run_discovery().await;
        }
        if config.has_explicit_repos() {
            if let Err(err) = self.bus.publish(BuildRequested::with_reason("scheduled build")) {
                tracing::warn!(%err, "failed to publish scheduled build request");
            }
        }
    }

    /// Run one discovery sweep, guarded against overlap.
    async fn run_discovery(self: &Arc<Self>) {
        let Some(discovery) = self.discovery.clone() else {
            return;
        };
        if self.discovery_running.swap(true, Ordering::SeqCst) {
            tracing::debug!("discovery already running, skipping");
            return;
        }

        let token = self.run_token();
        match discovery.discover_all(&token).await {
            Ok(result) => self.apply_discovery(result),
            Err(err) => tracing::warn!(%err, "discovery failed"),
        }
        self.discovery_running.store(false, Ordering::SeqCst);
    }

    /// Fold a discovery result into the cache; emit removals and a build
    /// request when the repo set changed.
    fn apply_discovery(&self, result: DiscoveryResult) {
        let previous = self.discovery_cache.repositories();
        let new_urls: Vec<&str> = result.repositories.iter().map(|r| r.url.as_str()).collect();

        for repo in &previous {
            if !new_urls.contains(&repo.url.as_str()) {
                let removed = RepoRemoved {
                    repo_url: repo.url.clone(),
                    repo_name: repo.name.clone(),
                    removed_at: chrono::Utc::now(),
                    discovered: true,
                };
                if let Err(err) = self.bus.publish(removed) {
                    tracing::warn!(%err, "failed to publish repo removal");
                }
            }
        }

        let changed = previous.len() != result.repositories.len()
            || previous.iter().any(|r| !new_urls.contains(&r.url.as_str()));
        self.discovery_cache.set(result);

        if changed {
            tracing::info!("discovered repo set changed, requesting build");
            if let Err(err) = self.bus.publish(BuildRequested::with_reason("discovery sync")) {
                tracing::warn!(%err, "failed to publish discovery build request");
            }
        }
    }

    /// Turn a coalesced trigger into a queued job.
    fn enqueue_build(self: &Arc<Self>, evt: BuildNow) {
        let config = self.config();
        let repositories = if config.has_explicit_repos() {
            config.repositories.clone()
        } else {
            self.discovery_cache.repositories()
        };

        let job_type = match evt.last_reason.as_str() {
            "scheduled build" => JobType::Scheduled,
            "webhook" => JobType::Webhook,
            "discovery sync" => JobType::Discovery,
            _ => JobType::Manual,
        };

        let mut job = BuildJob::with_id(
            evt.planned_job_id.clone().unwrap_or_else(generate_job_id),
            job_type,
        );
        job.priority = JobPriority::High;
        job.metadata.config = Some(config);
        job.metadata.repositories = repositories;
        job.metadata.state = Some(self.state.clone() as Arc<dyn StateAccess>);

        match self.queue.enqueue(job) {
            Ok(()) => {
                tracing::debug!(
                    requests = evt.request_count,
                    cause = evt.cause.as_str(),
                    "build job enqueued"
                );
            }
            Err(EnqueueError::Full) => {
                tracing::warn!("build queue full, dropping coalesced build trigger");
            }
            Err(err) => {
                tracing::warn!(%err, "failed to enqueue build job");
            }
        }
    }

    /// Stop the daemon, bounded by `deadline`.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        self.set_status(DaemonStatus::Stopping);

        if let Some(token) = self.run_cancel.lock().expect("run token lock poisoned").take() {
            token.cancel();
        }
        self.bus.close();
        self.queue.stop().await;

        if let Err(err) = self.state.save() {
            tracing::warn!(%err, "failed to save daemon state during shutdown");
        }

        let all_exited = self.workers.stop_and_wait(deadline).await;
        if !all_exited {
            tracing::warn!("some background workers did not exit before the deadline");
        }

        self.set_status(DaemonStatus::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Builder;
    use crate::state::SkipStateAccess;
    use crate::types::{JobStatus, StageError};
    use crate::updater::RemoteHead;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    struct OkBuilder {
        calls: AtomicUsize,
    }

    impl OkBuilder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Builder for OkBuilder {
        async fn build(
            &self,
            _cancel: &CancellationToken,
            job: &mut BuildJob,
        ) -> Result<BuildReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            let mut report = BuildReport::new(BuildOutcome::Success, now, now);
            report.repositories = job.metadata.repositories.len();
            report.builder_version = self.version();
            Ok(report)
        }

        fn version(&self) -> String {
            "test-builder 1.0".to_string()
        }
    }

    struct NeverChangedChecker;

    #[async_trait]
    impl RemoteHeadChecker for NeverChangedChecker {
        async fn check_remote_changed(
            &self,
            _repo: &Repository,
            _branch: &str,
        ) -> Result<RemoteHead> {
            Ok(RemoteHead {
                changed: false,
                sha: "s".to_string(),
            })
        }
    }

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.daemon.storage.repo_cache_dir = root.join("data");
        config.output.directory = root.join("out");
        config.daemon.build_debounce.quiet_window = Duration::from_millis(20);
        config.daemon.build_debounce.max_delay = Duration::from_millis(200);
        config
            .repositories
            .push(Repository::new("https://h/org/r.git", "r"));
        config
    }

    fn daemon_with(config: Config, builder: Arc<dyn Builder>) -> Arc<Daemon> {
        Arc::new(
            Daemon::new(config, builder, Arc::new(NeverChangedChecker), None).expect("daemon"),
        )
    }

    async fn wait_for_history(daemon: &Arc<Daemon>) -> crate::types::JobSummary {
        loop {
            if let Some(job) = daemon.queue().history().pop() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_request_flows_to_completed_job() {
        let td = tempdir().expect("tempdir");
        let builder = OkBuilder::new();
        let daemon = daemon_with(test_config(td.path()), builder.clone());

        daemon.start().await.expect("start");
        assert_eq!(daemon.status(), DaemonStatus::Running);

        daemon.request_build("manual test");
        let job = wait_for_history(&daemon).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);

        // The event store saw the lifecycle.
        let recent = daemon.recent_builds();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, Some(BuildOutcome::Success));

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
        assert_eq!(daemon.status(), DaemonStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_builds_once() {
        let td = tempdir().expect("tempdir");
        let builder = OkBuilder::new();
        let daemon = daemon_with(test_config(td.path()), builder.clone());
        daemon.start().await.expect("start");

        for _ in 0..5 {
            daemon.request_build("burst");
        }
        wait_for_history(&daemon).await;

        // Allow any stray emission to surface before counting.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.queue().history().len(), 1);

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn successful_build_persists_fingerprints() {
        let td = tempdir().expect("tempdir");
        let config = test_config(td.path());
        let output_dir = config.output_dir();
        let builder = OkBuilder::new();
        let daemon = daemon_with(config, builder);
        daemon.start().await.expect("start");

        daemon.request_build("persist test");
        wait_for_history(&daemon).await;

        assert!(crate::skip::report_path(&output_dir).is_file());
        assert!(daemon.state.last_report_checksum().is_some());
        assert!(daemon.state.last_config_hash().is_some());

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_rejects_new_work() {
        let td = tempdir().expect("tempdir");
        let daemon = daemon_with(test_config(td.path()), OkBuilder::new());
        daemon.start().await.expect("start");
        daemon.stop(Duration::from_secs(1)).await.expect("stop");

        // The bus is closed; manual requests are dropped quietly.
        daemon.request_build("late");
        assert!(daemon.queue().history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_triggers_rebuild() {
        let td = tempdir().expect("tempdir");
        let builder = OkBuilder::new();
        let daemon = daemon_with(test_config(td.path()), builder.clone());
        daemon.start().await.expect("start");

        let mut new_config = test_config(td.path());
        new_config.output.clean = true;
        daemon.update_config(new_config).expect("update");

        wait_for_history(&daemon).await;
        assert!(builder.calls.load(Ordering::SeqCst) >= 1);
        assert!(daemon.config().output.clean);

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
    }

    #[tokio::test]
    async fn update_config_rejects_invalid() {
        let td = tempdir().expect("tempdir");
        let daemon = daemon_with(test_config(td.path()), OkBuilder::new());

        let mut bad = test_config(td.path());
        bad.daemon.sync.queue_size = 0;
        assert!(daemon.update_config(bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_build_lands_in_history_as_failed() {
        struct FailingBuilder;

        #[async_trait]
        impl Builder for FailingBuilder {
            async fn build(
                &self,
                _cancel: &CancellationToken,
                _job: &mut BuildJob,
            ) -> Result<BuildReport> {
                let now = Utc::now();
                let mut report = BuildReport::new(BuildOutcome::Failed, now, now);
                report.errors.push(StageError {
                    stage: "render".to_string(),
                    message: "boom".to_string(),
                    transient: false,
                });
                Ok(report)
            }

            fn version(&self) -> String {
                "failing 1.0".to_string()
            }
        }

        let td = tempdir().expect("tempdir");
        let daemon = daemon_with(test_config(td.path()), Arc::new(FailingBuilder));
        daemon.start().await.expect("start");

        daemon.request_build("doomed");
        let job = wait_for_history(&daemon).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn health_reflects_queue_and_state() {
        let td = tempdir().expect("tempdir");
        let daemon = daemon_with(test_config(td.path()), OkBuilder::new());

        // Before start: state not loaded.
        assert!(daemon.health().degraded);

        daemon.start().await.expect("start");
        let health = daemon.health();
        assert!(!health.degraded);
        assert!(health.state_loaded);

        daemon.stop(Duration::from_secs(1)).await.expect("stop");
    }

    #[test]
    fn discovery_cache_round_trip() {
        let cache = DiscoveryCache::default();
        assert!(cache.get().is_none());
        assert_eq!(cache.error_count(), 0);

        cache.set(DiscoveryResult {
            repositories: vec![Repository::new("https://h/o/r.git", "r")],
            filtered: 2,
            errors: vec!["forge timeout".to_string()],
        });

        assert_eq!(cache.repositories().len(), 1);
        assert_eq!(cache.error_count(), 1);
    }
}
