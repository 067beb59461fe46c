use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::state::StateAccess;

/// What triggered a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Manual,
    Scheduled,
    Webhook,
    Discovery,
}

/// Advisory priority recorded on a job. The queue is strict FIFO; priority
/// is kept for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Lifecycle status of a build job.
///
/// Transitions are monotonic (`Queued → Running → Completed|Failed`)
/// except `Cancelled`, which may preempt a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Hook for pushing live-reload notifications after a build. The SSE
/// machinery lives outside the core; jobs only carry the handle.
pub trait LiveReloadNotifier: Send + Sync {
    fn notify_reload(&self);
}

/// Runtime-assembled inputs a job carries into the builder.
///
/// Optional collaborators are plain `Option` fields. Nothing here is
/// persisted; jobs live only in memory.
#[derive(Default, Clone)]
pub struct JobMetadata {
    /// Config snapshot taken at enqueue time.
    pub config: Option<Arc<Config>>,
    /// Target repositories, already pruned when a partial plan applies.
    pub repositories: Vec<Repository>,
    /// Delta plan that produced the repository list, when one was computed.
    pub delta: Option<DeltaPlan>,
    /// State store handle for post-build bookkeeping.
    pub state: Option<Arc<dyn StateAccess>>,
    /// Live-reload handle, present when a preview server is attached.
    pub live_reload: Option<Arc<dyn LiveReloadNotifier>>,
    /// Report produced by the builder (also kept on failed attempts).
    pub report: Option<BuildReport>,
}

impl fmt::Debug for JobMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMetadata")
            .field("config", &self.config.is_some())
            .field("repositories", &self.repositories.len())
            .field("delta", &self.delta)
            .field("state", &self.state.is_some())
            .field("live_reload", &self.live_reload.is_some())
            .field("report", &self.report.as_ref().map(|r| r.outcome))
            .finish()
    }
}

/// One logical build attempt, owned by the queue from enqueue until it is
/// evicted from the history ring.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Stable identifier; external triggers may pre-allocate it.
    pub id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at`, set on completion.
    pub duration: Option<Duration>,
    /// Last error message; `None` on success.
    pub error: Option<String>,
    pub metadata: JobMetadata,
}

impl BuildJob {
    /// Create a queued job with a fresh id.
    pub fn new(job_type: JobType) -> Self {
        Self::with_id(generate_job_id(), job_type)
    }

    /// Create a queued job with a caller-allocated id.
    pub fn with_id(id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            id: id.into(),
            job_type,
            priority: JobPriority::Normal,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
            metadata: JobMetadata::default(),
        }
    }

    /// Serializable snapshot for status surfaces.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            job_type: self.job_type,
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            error: self.error.clone(),
        }
    }
}

/// Generate a job id: millisecond timestamp plus a random suffix.
pub fn generate_job_id() -> String {
    use rand::RngExt;
    let suffix: u32 = rand::rng().random();
    format!("job-{}-{:08x}", Utc::now().timestamp_millis(), suffix)
}

/// Point-in-time view of a job, safe to serialize for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// A documentation repository the daemon builds from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Clone URL; the identity key everywhere in the core.
    pub url: String,
    /// Short name, unique within a site.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Paths inside the repo that hold documentation. Empty means the
    /// default `docs` directory.
    #[serde(default)]
    pub docs_paths: Vec<String>,
    /// Free-form metadata tags; discovery fills `full_name` here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Repository {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            branch: None,
            docs_paths: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Docs paths with the default applied.
    pub fn effective_docs_paths(&self) -> Vec<String> {
        if self.docs_paths.is_empty() {
            vec!["docs".to_string()]
        } else {
            self.docs_paths.clone()
        }
    }
}

/// Terminal outcome of a build as reported by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Warning,
    Failed,
    Canceled,
}

/// Error surfaced by one build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that failed (e.g. `clone`, `render`, `publish`).
    pub stage: String,
    pub message: String,
    /// Whether the builder considers this safe to retry.
    #[serde(default)]
    pub transient: bool,
}

/// Report produced by the builder for one job. Persisted as
/// `build-report.json` under the output directory; its SHA-256 is the
/// skip evaluator's integrity guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    /// Number of repositories included in the build.
    #[serde(default)]
    pub repositories: usize,
    /// Number of documentation files rendered.
    #[serde(default)]
    pub files: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Wall time per stage, in milliseconds.
    #[serde(default)]
    pub stage_durations_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub errors: Vec<StageError>,
    /// SHA-256 over the sorted union of all doc-file paths.
    #[serde(default)]
    pub doc_files_hash: String,
    /// Per-repo doc-file hashes, keyed by repo URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repo_doc_hashes: BTreeMap<String, String>,
    /// Version of the builder that produced this report.
    #[serde(default)]
    pub builder_version: String,
    /// Retries spent before this report was final.
    #[serde(default)]
    pub retries: u32,
    /// Set when retries ran out on a transient error.
    #[serde(default)]
    pub retries_exhausted: bool,
}

impl BuildReport {
    /// An empty report skeleton for the given window.
    pub fn new(outcome: BuildOutcome, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            outcome,
            repositories: 0,
            files: 0,
            start,
            end,
            skip_reason: None,
            stage_durations_ms: BTreeMap::new(),
            errors: Vec::new(),
            doc_files_hash: String::new(),
            repo_doc_hashes: BTreeMap::new(),
            builder_version: String::new(),
            retries: 0,
            retries_exhausted: false,
        }
    }

    /// Synthetic report for a skipped build.
    pub fn skipped(reason: &str, builder_version: &str) -> Self {
        let now = Utc::now();
        let mut report = Self::new(BuildOutcome::Success, now, now);
        report.skip_reason = Some(reason.to_string());
        report.builder_version = builder_version.to_string();
        report
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Failed)
    }

    /// First transient stage error, if any. The queue uses this to decide
    /// whether a failed attempt is worth retrying.
    pub fn transient_stage(&self) -> Option<&StageError> {
        self.errors.iter().find(|e| e.transient)
    }

    /// First error message, for the job's error field.
    pub fn first_error(&self) -> Option<&StageError> {
        self.errors.first()
    }
}

/// Whether a build covers the whole site or a changed-repo subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaDecision {
    Full,
    Partial,
}

/// Why the delta analyzer decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaReason {
    NoDetectedRepoChange,
    AllReposChanged,
    AllReposUnknownState,
    QuickHashDiff,
}

impl DeltaReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaReason::NoDetectedRepoChange => "no_detected_repo_change",
            DeltaReason::AllReposChanged => "all_repos_changed",
            DeltaReason::AllReposUnknownState => "all_repos_unknown_state",
            DeltaReason::QuickHashDiff => "quick_hash_diff",
        }
    }
}

/// The delta analyzer's classification of a pending build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPlan {
    pub decision: DeltaDecision,
    /// Repo URLs to rebuild; populated when the decision is partial.
    #[serde(default)]
    pub changed_repos: BTreeSet<String>,
    pub reason: DeltaReason,
    /// Optional human-readable reason per repo URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repo_reasons: BTreeMap<String, String>,
}

impl DeltaPlan {
    /// A full-build plan with the given reason.
    pub fn full(reason: DeltaReason) -> Self {
        Self {
            decision: DeltaDecision::Full,
            changed_repos: BTreeSet::new(),
            reason,
            repo_reasons: BTreeMap::new(),
        }
    }
}

/// Result of one discovery sweep against the configured forges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub repositories: Vec<Repository>,
    /// Repos the forge returned but filters excluded.
    #[serde(default)]
    pub filtered: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}
