//! Bounded build queue with a worker pool.
//!
//! Jobs enter through a non-blocking bounded channel; a full queue is
//! surfaced to the caller as backpressure instead of silently blocking.
//! Workers pull jobs in strict FIFO order (priority is recorded, never
//! used for ordering), run them through the pluggable [`Builder`] with a
//! retry loop for transient stage errors, and move them into a bounded
//! history ring. Every job gets its own cancellation token derived from
//! the queue's stop token, so shutdown cancels in-flight builds.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use docbuild_retry::RetryPolicy;

use crate::types::{BuildJob, BuildOutcome, BuildReport, JobStatus, JobSummary};

/// Default queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default number of build workers.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default history ring size.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Why an enqueue was refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The bounded queue is at capacity; backpressure for the caller.
    #[error("queue is full")]
    Full,
    /// The queue has been stopped.
    #[error("queue is stopped")]
    Stopped,
    /// Jobs must carry a non-empty id.
    #[error("job id must not be empty")]
    EmptyId,
}

/// The external collaborator that turns a job into a report.
///
/// Implementations must observe `cancel` and return promptly once it
/// fires. A build that fails in a stage should return `Ok` with a report
/// whose outcome is [`BuildOutcome::Failed`] and stage errors attached;
/// `Err` is reserved for infrastructure failures that produce no report.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Jobs are passed mutably so orchestration layers can prune the
    /// repo list and attach delta plans before the real work starts.
    async fn build(&self, cancel: &CancellationToken, job: &mut BuildJob) -> Result<BuildReport>;

    /// Version string recorded in reports and checked by the skip
    /// evaluator.
    fn version(&self) -> String;
}

/// Sink for job lifecycle events. Emission failures are logged by the
/// queue and never propagated.
pub trait JobEventSink: Send + Sync {
    fn build_started(&self, job: &BuildJob) -> Result<()>;
    fn build_report(&self, job: &BuildJob, report: &BuildReport) -> Result<()>;
    fn build_completed(&self, job: &BuildJob, duration: Duration) -> Result<()>;
    fn build_failed(&self, job: &BuildJob, stage: Option<&str>, error: &str) -> Result<()>;
}

/// Construction parameters for the queue.
#[derive(Debug, Clone)]
pub struct BuildQueueConfig {
    pub max_size: usize,
    pub worker_count: usize,
    pub history_size: usize,
    pub retry: RetryPolicy,
}

impl Default for BuildQueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_QUEUE_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            history_size: DEFAULT_HISTORY_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

struct ActiveEntry {
    job: BuildJob,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueShared {
    active: HashMap<String, ActiveEntry>,
    history: VecDeque<BuildJob>,
    workers: JoinSet<()>,
    started: bool,
}

struct QueueInner {
    tx: mpsc::Sender<BuildJob>,
    rx: tokio::sync::Mutex<mpsc::Receiver<BuildJob>>,
    builder: Arc<dyn Builder>,
    emitter: Option<Arc<dyn JobEventSink>>,
    retry: RetryPolicy,
    history_size: usize,
    worker_count: usize,
    stop: CancellationToken,
    shared: Mutex<QueueShared>,
    running: AtomicUsize,
}

/// Bounded FIFO build queue with N workers.
#[derive(Clone)]
pub struct BuildQueue {
    inner: Arc<QueueInner>,
}

impl BuildQueue {
    /// Create a queue. Fails on zero sizes.
    pub fn new(
        builder: Arc<dyn Builder>,
        config: BuildQueueConfig,
        emitter: Option<Arc<dyn JobEventSink>>,
    ) -> Result<Self> {
        if config.max_size == 0 {
            bail!("queue max size must be at least 1");
        }
        if config.worker_count == 0 {
            bail!("queue worker count must be at least 1");
        }

        let (tx, rx) = mpsc::channel(config.max_size);
        Ok(Self {
            inner: Arc::new(QueueInner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                builder,
                emitter,
                retry: config.retry.validated(),
                history_size: config.history_size.max(1),
                worker_count: config.worker_count,
                stop: CancellationToken::new(),
                shared: Mutex::new(QueueShared::default()),
                running: AtomicUsize::new(0),
            }),
        })
    }

    /// Start the worker pool. Idempotent; the second call is a no-op.
    pub fn start(&self) {
        let mut shared = self.inner.shared.lock().expect("queue lock poisoned");
        if shared.started {
            return;
        }
        shared.started = true;
        for idx in 0..self.inner.worker_count {
            let inner = self.inner.clone();
            shared.workers.spawn(async move {
                worker_loop(inner, idx).await;
            });
        }
    }

    /// Enqueue a job without blocking. A full queue is an error the
    /// caller must handle.
    pub fn enqueue(&self, mut job: BuildJob) -> Result<(), EnqueueError> {
        if job.id.is_empty() {
            return Err(EnqueueError::EmptyId);
        }
        if self.inner.stop.is_cancelled() {
            return Err(EnqueueError::Stopped);
        }
        job.status = JobStatus::Queued;

        match self.inner.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Stopped),
        }
    }

    /// Stop the queue: cancel active jobs and join all workers.
    pub async fn stop(&self) {
        self.inner.stop.cancel();

        let cancels: Vec<CancellationToken> = {
            let shared = self.inner.shared.lock().expect("queue lock poisoned");
            shared.active.values().map(|e| e.cancel.clone()).collect()
        };
        for cancel in cancels {
            cancel.cancel();
        }

        let mut workers = {
            let mut shared = self.inner.shared.lock().expect("queue lock poisoned");
            std::mem::take(&mut shared.workers)
        };
        while workers.join_next().await.is_some() {}
    }

    /// Cancel one job by id, if it is currently running.
    pub fn cancel_job(&self, id: &str) -> bool {
        let shared = self.inner.shared.lock().expect("queue lock poisoned");
        match shared.active.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of jobs currently being built.
    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether any build is running; the debouncer's gate.
    pub fn is_build_running(&self) -> bool {
        self.running_count() > 0
    }

    /// Jobs waiting in the channel.
    pub fn queued_count(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    /// Snapshots of currently running jobs.
    pub fn active_jobs(&self) -> Vec<JobSummary> {
        let shared = self.inner.shared.lock().expect("queue lock poisoned");
        shared.active.values().map(|e| e.job.summary()).collect()
    }

    /// Snapshots of completed jobs, oldest first.
    pub fn history(&self) -> Vec<JobSummary> {
        let shared = self.inner.shared.lock().expect("queue lock poisoned");
        shared.history.iter().map(BuildJob::summary).collect()
    }

    /// Terminal jobs, full records, oldest first.
    pub fn history_jobs(&self) -> Vec<BuildJob> {
        let shared = self.inner.shared.lock().expect("queue lock poisoned");
        shared.history.iter().cloned().collect()
    }

    /// Look a job up across active and history.
    pub fn job_summary(&self, id: &str) -> Option<JobSummary> {
        let shared = self.inner.shared.lock().expect("queue lock poisoned");
        if let Some(entry) = shared.active.get(id) {
            return Some(entry.job.summary());
        }
        shared
            .history
            .iter()
            .rev()
            .find(|j| j.id == id)
            .map(BuildJob::summary)
    }
}

async fn worker_loop(inner: Arc<QueueInner>, worker_idx: usize) {
    loop {
        let job = tokio::select! {
            _ = inner.stop.cancelled() => return,
            job = async {
                let mut rx = inner.rx.lock().await;
                rx.recv().await
            } => job,
        };
        let Some(job) = job else { return };
        tracing::debug!(worker = worker_idx, job = %job.id, "worker picked up job");
        process_job(&inner, job).await;
    }
}

async fn process_job(inner: &QueueInner, mut job: BuildJob) {
    let cancel = inner.stop.child_token();

    job.started_at = Some(Utc::now());
    job.status = JobStatus::Running;
    {
        let mut shared = inner.shared.lock().expect("queue lock poisoned");
        shared.active.insert(
            job.id.clone(),
            ActiveEntry {
                job: job.clone(),
                cancel: cancel.clone(),
            },
        );
    }
    inner.running.fetch_add(1, Ordering::SeqCst);

    emit(inner, |sink| sink.build_started(&job));

    let outcome = execute_build(inner, &cancel, &mut job).await;

    let completed_at = Utc::now();
    job.completed_at = Some(completed_at);
    job.duration = job
        .started_at
        .map(|started| (completed_at - started).to_std().unwrap_or_default());

    match &outcome {
        ExecuteOutcome::Success => {
            job.status = JobStatus::Completed;
            job.error = None;
        }
        ExecuteOutcome::Failed { stage: _, message } => {
            job.status = JobStatus::Failed;
            job.error = Some(message.clone());
        }
        ExecuteOutcome::Cancelled => {
            job.status = JobStatus::Cancelled;
            job.error = Some("build cancelled".to_string());
        }
    }

    {
        let mut shared = inner.shared.lock().expect("queue lock poisoned");
        shared.active.remove(&job.id);
        shared.history.push_back(job.clone());
        while shared.history.len() > inner.history_size {
            shared.history.pop_front();
        }
    }
    inner.running.fetch_sub(1, Ordering::SeqCst);

    if let Some(report) = &job.metadata.report {
        emit(inner, |sink| sink.build_report(&job, report));
    }
    match &outcome {
        ExecuteOutcome::Success => {
            let duration = job.duration.unwrap_or_default();
            emit(inner, |sink| sink.build_completed(&job, duration));
        }
        ExecuteOutcome::Failed { stage, message } => {
            emit(inner, |sink| sink.build_failed(&job, stage.as_deref(), message));
        }
        ExecuteOutcome::Cancelled => {
            emit(inner, |sink| sink.build_failed(&job, None, "build cancelled"));
        }
    }

    tracing::info!(job = %job.id, status = %job.status, "job finished");
}

enum ExecuteOutcome {
    Success,
    Failed {
        stage: Option<String>,
        message: String,
    },
    Cancelled,
}

/// Run the builder with the retry loop for transient stage errors.
async fn execute_build(
    inner: &QueueInner,
    cancel: &CancellationToken,
    job: &mut BuildJob,
) -> ExecuteOutcome {
    let mut retries_used: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return ExecuteOutcome::Cancelled;
        }

        match inner.builder.build(cancel, job).await {
            Ok(mut report) => {
                report.retries = retries_used;
                let failed = report.is_failed();
                let canceled = matches!(report.outcome, BuildOutcome::Canceled);
                job.metadata.report = Some(report.clone());

                if canceled || cancel.is_cancelled() {
                    return if cancel.is_cancelled() {
                        ExecuteOutcome::Cancelled
                    } else {
                        ExecuteOutcome::Failed {
                            stage: None,
                            message: "build canceled by builder".to_string(),
                        }
                    };
                }
                if !failed {
                    return ExecuteOutcome::Success;
                }

                let transient_stage = report.transient_stage().map(|e| e.stage.clone());
                let message = report
                    .first_error()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "build failed".to_string());

                match transient_stage {
                    Some(stage) if inner.retry.allows(retries_used + 1) => {
                        retries_used += 1;
                        let delay = inner.retry.delay(retries_used);
                        tracing::warn!(
                            job = %job.id,
                            stage = %stage,
                            retry = retries_used,
                            ?delay,
                            "transient stage error, retrying"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return ExecuteOutcome::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    Some(stage) => {
                        if let Some(report) = job.metadata.report.as_mut() {
                            report.retries_exhausted = true;
                        }
                        tracing::warn!(job = %job.id, stage = %stage, "retries exhausted");
                        return ExecuteOutcome::Failed {
                            stage: Some(stage),
                            message,
                        };
                    }
                    None => {
                        let stage = report.first_error().map(|e| e.stage.clone());
                        return ExecuteOutcome::Failed { stage, message };
                    }
                }
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    return ExecuteOutcome::Cancelled;
                }
                return ExecuteOutcome::Failed {
                    stage: None,
                    message: format!("{err:#}"),
                };
            }
        }
    }
}

fn emit<F: FnOnce(&dyn JobEventSink) -> Result<()>>(inner: &QueueInner, f: F) {
    if let Some(sink) = &inner.emitter
        && let Err(err) = f(sink.as_ref())
    {
        tracing::warn!(%err, "job event emission failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobType, StageError};
    use docbuild_retry::RetryBackoff;
    use std::sync::Mutex as StdMutex;

    enum Step {
        Succeed,
        FailTransient(&'static str),
        FailPermanent(&'static str),
        BlockUntilCancel,
    }

    struct ScriptedBuilder {
        steps: StdMutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedBuilder {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: StdMutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Builder for ScriptedBuilder {
        async fn build(&self, cancel: &CancellationToken, _job: &mut BuildJob) -> Result<BuildReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().expect("steps").pop_front().unwrap_or(Step::Succeed);
            let now = Utc::now();
            match step {
                Step::Succeed => Ok(BuildReport::new(BuildOutcome::Success, now, now)),
                Step::FailTransient(stage) => {
                    let mut report = BuildReport::new(BuildOutcome::Failed, now, now);
                    report.errors.push(StageError {
                        stage: stage.to_string(),
                        message: format!("{stage} flaked"),
                        transient: true,
                    });
                    Ok(report)
                }
                Step::FailPermanent(stage) => {
                    let mut report = BuildReport::new(BuildOutcome::Failed, now, now);
                    report.errors.push(StageError {
                        stage: stage.to_string(),
                        message: format!("{stage} broke"),
                        transient: false,
                    });
                    Ok(report)
                }
                Step::BlockUntilCancel => {
                    cancel.cancelled().await;
                    Ok(BuildReport::new(BuildOutcome::Canceled, now, now))
                }
            }
        }

        fn version(&self) -> String {
            "scripted 1.0".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().expect("events").clone()
        }
    }

    impl JobEventSink for RecordingSink {
        fn build_started(&self, job: &BuildJob) -> Result<()> {
            self.events.lock().expect("events").push(format!("started:{}", job.id));
            Ok(())
        }

        fn build_report(&self, job: &BuildJob, _report: &BuildReport) -> Result<()> {
            self.events.lock().expect("events").push(format!("report:{}", job.id));
            Ok(())
        }

        fn build_completed(&self, job: &BuildJob, _duration: Duration) -> Result<()> {
            self.events.lock().expect("events").push(format!("completed:{}", job.id));
            Ok(())
        }

        fn build_failed(&self, job: &BuildJob, _stage: Option<&str>, _error: &str) -> Result<()> {
            self.events.lock().expect("events").push(format!("failed:{}", job.id));
            Ok(())
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            backoff: RetryBackoff::Fixed,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_retries,
        }
    }

    fn queue_with(
        builder: Arc<dyn Builder>,
        retry: RetryPolicy,
        emitter: Option<Arc<dyn JobEventSink>>,
    ) -> BuildQueue {
        let queue = BuildQueue::new(
            builder,
            BuildQueueConfig {
                max_size: 8,
                worker_count: 1,
                history_size: 8,
                retry,
            },
            emitter,
        )
        .expect("queue");
        queue.start();
        queue
    }

    async fn wait_terminal(queue: &BuildQueue, id: &str) -> JobSummary {
        loop {
            if let Some(summary) = queue.job_summary(id)
                && summary.status.is_terminal()
            {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueued_job_reaches_completed() {
        let builder = ScriptedBuilder::new(vec![Step::Succeed]);
        let queue = queue_with(builder.clone(), fast_retry(2), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");
        let summary = wait_terminal(&queue, "j1").await;

        assert_eq!(summary.status, JobStatus::Completed);
        assert!(summary.error.is_none());
        assert!(summary.started_at.is_some());
        assert!(summary.completed_at.is_some());
        assert_eq!(builder.calls(), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let builder = ScriptedBuilder::new(vec![]);
        let queue = BuildQueue::new(builder, BuildQueueConfig::default(), None).expect("queue");

        let result = queue.enqueue(BuildJob::with_id("", JobType::Manual));
        assert_eq!(result, Err(EnqueueError::EmptyId));
    }

    #[tokio::test]
    async fn full_queue_surfaces_backpressure() {
        let builder = ScriptedBuilder::new(vec![]);
        let queue = BuildQueue::new(
            builder,
            BuildQueueConfig {
                max_size: 2,
                ..BuildQueueConfig::default()
            },
            None,
        )
        .expect("queue");
        // Workers never started: jobs stay queued.

        queue.enqueue(BuildJob::with_id("a", JobType::Manual)).expect("enqueue");
        queue.enqueue(BuildJob::with_id("b", JobType::Manual)).expect("enqueue");
        assert_eq!(
            queue.enqueue(BuildJob::with_id("c", JobType::Manual)),
            Err(EnqueueError::Full)
        );
        assert_eq!(queue.queued_count(), 2);
    }

    #[tokio::test]
    async fn zero_sizes_rejected_at_construction() {
        let builder = ScriptedBuilder::new(vec![]);
        assert!(
            BuildQueue::new(
                builder.clone(),
                BuildQueueConfig {
                    max_size: 0,
                    ..BuildQueueConfig::default()
                },
                None,
            )
            .is_err()
        );
        assert!(
            BuildQueue::new(
                builder,
                BuildQueueConfig {
                    worker_count: 0,
                    ..BuildQueueConfig::default()
                },
                None,
            )
            .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_then_succeeds() {
        let builder = ScriptedBuilder::new(vec![Step::FailTransient("clone"), Step::Succeed]);
        let queue = queue_with(builder.clone(), fast_retry(3), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Webhook)).expect("enqueue");
        let summary = wait_terminal(&queue, "j1").await;

        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(builder.calls(), 2);

        let job = queue.history_jobs().pop().expect("history");
        let report = job.metadata.report.expect("report");
        assert_eq!(report.retries, 1);
        assert!(!report.retries_exhausted);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_and_mark_report() {
        let builder = ScriptedBuilder::new(vec![
            Step::FailTransient("clone"),
            Step::FailTransient("clone"),
        ]);
        let queue = queue_with(builder.clone(), fast_retry(1), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");
        let summary = wait_terminal(&queue, "j1").await;

        assert_eq!(summary.status, JobStatus::Failed);
        assert_eq!(builder.calls(), 2);

        let job = queue.history_jobs().pop().expect("history");
        let report = job.metadata.report.expect("report");
        assert!(report.retries_exhausted);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let builder = ScriptedBuilder::new(vec![Step::FailPermanent("render")]);
        let queue = queue_with(builder.clone(), fast_retry(5), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");
        let summary = wait_terminal(&queue, "j1").await;

        assert_eq!(summary.status, JobStatus::Failed);
        assert_eq!(summary.error.as_deref(), Some("render broke"));
        assert_eq!(builder.calls(), 1);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_running_job() {
        let builder = ScriptedBuilder::new(vec![Step::BlockUntilCancel]);
        let queue = queue_with(builder.clone(), fast_retry(0), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");

        // Let the worker pick the job up.
        while !queue.is_build_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        queue.stop().await;

        let summary = queue.job_summary("j1").expect("job");
        assert_eq!(summary.status, JobStatus::Cancelled);
        assert!(queue.active_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn per_job_cancel_preempts_running_job() {
        let builder = ScriptedBuilder::new(vec![Step::BlockUntilCancel, Step::Succeed]);
        let queue = queue_with(builder.clone(), fast_retry(0), None);

        queue.enqueue(BuildJob::with_id("victim", JobType::Manual)).expect("enqueue");
        while !queue.is_build_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(queue.cancel_job("victim"));
        let summary = wait_terminal(&queue, "victim").await;
        assert_eq!(summary.status, JobStatus::Cancelled);

        // The queue keeps serving later jobs.
        queue.enqueue(BuildJob::with_id("next", JobType::Manual)).expect("enqueue");
        let summary = wait_terminal(&queue, "next").await;
        assert_eq!(summary.status, JobStatus::Completed);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn history_ring_evicts_oldest() {
        let builder = ScriptedBuilder::new(vec![Step::Succeed, Step::Succeed, Step::Succeed]);
        let queue = BuildQueue::new(
            builder,
            BuildQueueConfig {
                max_size: 8,
                worker_count: 1,
                history_size: 2,
                retry: fast_retry(0),
            },
            None,
        )
        .expect("queue");
        queue.start();

        for id in ["a", "b", "c"] {
            queue.enqueue(BuildJob::with_id(id, JobType::Manual)).expect("enqueue");
        }
        wait_terminal(&queue, "c").await;

        let ids: Vec<String> = queue.history().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(queue.job_summary("a").is_none());
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_in_fifo_order() {
        let builder = ScriptedBuilder::new(vec![Step::Succeed, Step::Succeed, Step::Succeed]);
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(builder, fast_retry(0), Some(sink.clone()));

        for id in ["first", "second", "third"] {
            let mut job = BuildJob::with_id(id, JobType::Manual);
            // Priority is advisory; FIFO must win.
            if id == "third" {
                job.priority = crate::types::JobPriority::Urgent;
            }
            queue.enqueue(job).expect("enqueue");
        }
        wait_terminal(&queue, "third").await;

        let started: Vec<String> = sink
            .events()
            .into_iter()
            .filter(|e| e.starts_with("started:"))
            .collect();
        assert_eq!(started, vec!["started:first", "started:second", "started:third"]);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_in_order() {
        let builder = ScriptedBuilder::new(vec![Step::Succeed]);
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(builder, fast_retry(0), Some(sink.clone()));

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");
        wait_terminal(&queue, "j1").await;

        assert_eq!(
            sink.events(),
            vec!["started:j1", "report:j1", "completed:j1"]
        );
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn active_and_history_are_disjoint() {
        let builder = ScriptedBuilder::new(vec![Step::BlockUntilCancel]);
        let queue = queue_with(builder, fast_retry(0), None);

        queue.enqueue(BuildJob::with_id("j1", JobType::Manual)).expect("enqueue");
        while !queue.is_build_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(queue.active_jobs().len(), 1);
        assert!(queue.history().is_empty());

        queue.cancel_job("j1");
        wait_terminal(&queue, "j1").await;

        assert!(queue.active_jobs().is_empty());
        assert_eq!(queue.history().len(), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_rejected() {
        let builder = ScriptedBuilder::new(vec![]);
        let queue = BuildQueue::new(builder, BuildQueueConfig::default(), None).expect("queue");
        queue.start();
        queue.stop().await;

        assert_eq!(
            queue.enqueue(BuildJob::with_id("late", JobType::Manual)),
            Err(EnqueueError::Stopped)
        );
    }
}
