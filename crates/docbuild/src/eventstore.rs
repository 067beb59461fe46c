//! Append-only job-lifecycle log with a bounded recent-builds projection.
//!
//! Every lifecycle transition of a build job is appended to
//! `events.jsonl` in the state directory. On open, the file is replayed
//! to rebuild the in-memory "recent builds" projection. The log is the
//! authoritative source for recent-builds queries; the queue's in-memory
//! history ring is only a fast path.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::JobEventSink;
use crate::types::{BuildJob, BuildOutcome, BuildReport, JobPriority, JobType};

/// Default events file name inside the state directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Default size of the recent-builds projection.
pub const DEFAULT_RECENT_CAP: usize = 50;

/// Get the events file path for a state directory.
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    Report {
        outcome: BuildOutcome,
        repositories: usize,
        files: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    Completed {
        duration_ms: u64,
    },
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        message: String,
    },
}

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

/// Projection entry: the lifecycle of one recent job, folded from its
/// events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentBuild {
    pub job_id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BuildOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct StoreInner {
    recent: VecDeque<RecentBuild>,
    cap: usize,
}

/// Append-only event store backed by a JSONL file.
pub struct EventStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl EventStore {
    /// Open the store, replaying any existing log into the recent-builds
    /// projection. A missing file starts an empty projection.
    pub fn open(state_dir: &Path, recent_cap: usize) -> Result<Self> {
        let path = events_path(state_dir);
        let store = Self {
            path,
            inner: Mutex::new(StoreInner {
                recent: VecDeque::new(),
                cap: recent_cap.max(1),
            }),
        };

        for event in store.read_all()? {
            store.project(&event);
        }
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event to the log and fold it into the projection.
    pub fn append(&self, event: &JobEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let line = serde_json::to_string(event).context("failed to serialize job event")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open events file {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        self.project(event);
        Ok(())
    }

    /// Read the entire log. Unparseable lines are skipped; a truncated
    /// tail from a crash must not poison the whole history.
    pub fn read_all(&self) -> Result<Vec<JobEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("failed to open events file {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line
                .with_context(|| format!("failed to read line from {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JobEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(%err, "skipping unparseable event log line");
                }
            }
        }
        Ok(events)
    }

    /// The recent-builds projection, newest first.
    pub fn recent_builds(&self) -> Vec<RecentBuild> {
        let inner = self.inner.lock().expect("event store lock poisoned");
        inner.recent.iter().rev().cloned().collect()
    }

    fn project(&self, event: &JobEvent) {
        let mut inner = self.inner.lock().expect("event store lock poisoned");
        match &event.kind {
            JobEventKind::Started => {
                inner.recent.push_back(RecentBuild {
                    job_id: event.job_id.clone(),
                    job_type: event.job_type,
                    priority: event.priority,
                    started_at: event.timestamp,
                    completed_at: None,
                    duration_ms: None,
                    outcome: None,
                    skip_reason: None,
                    error: None,
                });
                while inner.recent.len() > inner.cap {
                    inner.recent.pop_front();
                }
            }
            JobEventKind::Report {
                outcome,
                skip_reason,
                ..
            } => {
                if let Some(entry) = inner.recent.iter_mut().rev().find(|e| e.job_id == event.job_id)
                {
                    entry.outcome = Some(*outcome);
                    entry.skip_reason = skip_reason.clone();
                }
            }
            JobEventKind::Completed { duration_ms } => {
                if let Some(entry) = inner.recent.iter_mut().rev().find(|e| e.job_id == event.job_id)
                {
                    entry.completed_at = Some(event.timestamp);
                    entry.duration_ms = Some(*duration_ms);
                }
            }
            JobEventKind::Failed { message, .. } => {
                if let Some(entry) = inner.recent.iter_mut().rev().find(|e| e.job_id == event.job_id)
                {
                    entry.completed_at = Some(event.timestamp);
                    entry.error = Some(message.clone());
                }
            }
        }
    }

    fn event(job: &BuildJob, kind: JobEventKind) -> JobEvent {
        JobEvent {
            timestamp: Utc::now(),
            job_id: job.id.clone(),
            job_type: job.job_type,
            priority: job.priority,
            kind,
        }
    }
}

impl JobEventSink for EventStore {
    fn build_started(&self, job: &BuildJob) -> Result<()> {
        self.append(&Self::event(job, JobEventKind::Started))
    }

    fn build_report(&self, job: &BuildJob, report: &BuildReport) -> Result<()> {
        self.append(&Self::event(
            job,
            JobEventKind::Report {
                outcome: report.outcome,
                repositories: report.repositories,
                files: report.files,
                skip_reason: report.skip_reason.clone(),
            },
        ))
    }

    fn build_completed(&self, job: &BuildJob, duration: Duration) -> Result<()> {
        self.append(&Self::event(
            job,
            JobEventKind::Completed {
                duration_ms: duration.as_millis() as u64,
            },
        ))
    }

    fn build_failed(&self, job: &BuildJob, stage: Option<&str>, error: &str) -> Result<()> {
        self.append(&Self::event(
            job,
            JobEventKind::Failed {
                stage: stage.map(String::from),
                message: error.to_string(),
            },
        ))
    }
}
