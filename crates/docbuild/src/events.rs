//! Orchestration events published on the daemon's event bus.
//!
//! Every struct here is an immutable value: the bus clones it per
//! subscriber and never retains a reference after delivery. Together they
//! form the typed contract between the trigger sources (scheduler,
//! webhooks, filesystem watches, manual requests), the debouncer, and the
//! build queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A build was asked for. Bursts of these are coalesced by the debouncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequested {
    /// Pre-allocated job id, when the trigger wants to track the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Forwarded immediacy flag; the debouncer does not shorten its
    /// windows because of it.
    #[serde(default)]
    pub immediate: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl BuildRequested {
    /// A plain request with just a reason, timestamped now.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            job_id: None,
            immediate: false,
            reason: reason.into(),
            repo_url: None,
            branch: None,
            requested_at: Utc::now(),
        }
    }
}

/// Why the debouncer emitted a [`BuildNow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceCause {
    /// The quiet window elapsed with no new requests.
    Quiet,
    /// The max-delay ceiling was hit while requests kept arriving.
    MaxDelay,
    /// A blocking build finished and the held-back burst was released.
    AfterRunning,
}

impl DebounceCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebounceCause::Quiet => "quiet",
            DebounceCause::MaxDelay => "max_delay",
            DebounceCause::AfterRunning => "after_running",
        }
    }
}

/// The debouncer's verdict: run one build now for a coalesced burst.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNow {
    pub triggered_at: DateTime<Utc>,
    /// How many requests were coalesced into this emission.
    pub request_count: u32,
    pub last_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_repo_url: Option<String>,
    pub first_request: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
    pub cause: DebounceCause,
    /// Job id allocated ahead of emission, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_job_id: Option<String>,
}

/// An inbound forge webhook, already parsed by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceived {
    pub job_id: String,
    pub forge_name: String,
    /// `owner/repo` as the forge reports it.
    pub repo_full_name: String,
    pub branch: String,
    /// Changed file paths from the push payload; empty when the forge
    /// does not provide them.
    #[serde(default)]
    pub changed_files: Vec<String>,
}

/// Ask the repo updater to probe one repository's remote HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoUpdateRequested {
    pub job_id: String,
    pub immediate: bool,
    pub repo_url: String,
    pub branch: String,
}

/// Outcome of a remote-HEAD probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoUpdated {
    pub job_id: String,
    pub repo_url: String,
    pub changed: bool,
    pub commit_sha: String,
    pub immediate: bool,
}

/// A repository left the configured or discovered set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRemoved {
    pub repo_url: String,
    pub repo_name: String,
    pub removed_at: DateTime<Utc>,
    /// Whether the repo came from discovery rather than explicit config.
    pub discovered: bool,
}
