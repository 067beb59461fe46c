//! Repo updater: turns [`RepoUpdateRequested`] into remote-HEAD probes
//! and, on change, build requests.
//!
//! The git plumbing lives behind [`RemoteHeadChecker`]; this loop only
//! decides whether a probe result warrants a build. Unknown repos are
//! ignored so stale webhook deliveries cannot trigger work.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::events::{BuildRequested, RepoUpdateRequested, RepoUpdated};
use crate::types::Repository;

/// Provider of the current repo set: explicit config when present,
/// otherwise the cached discovery result.
pub type RepoSetProvider = Arc<dyn Fn() -> Vec<Repository> + Send + Sync>;

/// Result of probing a repository's remote HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub changed: bool,
    pub sha: String,
}

/// Probes a repository's remote HEAD against the cached clone.
#[async_trait]
pub trait RemoteHeadChecker: Send + Sync {
    async fn check_remote_changed(&self, repo: &Repository, branch: &str) -> Result<RemoteHead>;
}

/// Consumer loop for [`RepoUpdateRequested`] events.
pub struct RepoUpdater {
    bus: EventBus,
    checker: Arc<dyn RemoteHeadChecker>,
    repos: RepoSetProvider,
}

impl RepoUpdater {
    pub fn new(bus: EventBus, checker: Arc<dyn RemoteHeadChecker>, repos: RepoSetProvider) -> Self {
        Self { bus, checker, repos }
    }

    /// Subscribe to [`RepoUpdateRequested`]; call before spawning
    /// [`run`](Self::run) so no request published in between is lost.
    pub fn subscribe(
        &self,
    ) -> Result<
        (
            tokio::sync::mpsc::Receiver<RepoUpdateRequested>,
            crate::bus::Subscription,
        ),
        crate::bus::BusError,
    > {
        self.bus.subscribe::<RepoUpdateRequested>(32)
    }

    /// Run over `rx` until `cancel` fires.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut rx: tokio::sync::mpsc::Receiver<RepoUpdateRequested>,
    ) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => return,
                evt = rx.recv() => match evt {
                    Some(evt) => evt,
                    None => return,
                },
            };
            self.handle(&request).await;
        }
    }

    /// Probe one request and publish the outcome.
    pub async fn handle(&self, request: &RepoUpdateRequested) {
        let Some(repo) = (self.repos)()
            .into_iter()
            .find(|r| r.url == request.repo_url)
        else {
            tracing::debug!(url = %request.repo_url, "update requested for unknown repo, ignoring");
            return;
        };

        let head = match self
            .checker
            .check_remote_changed(&repo, &request.branch)
            .await
        {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(url = %repo.url, %err, "remote HEAD probe failed");
                return;
            }
        };

        let updated = RepoUpdated {
            job_id: request.job_id.clone(),
            repo_url: repo.url.clone(),
            changed: head.changed,
            commit_sha: head.sha,
            immediate: request.immediate,
        };
        if let Err(err) = self.bus.publish(updated) {
            tracing::warn!(%err, "failed to publish repo update result");
            return;
        }

        if !head.changed {
            tracing::debug!(url = %repo.url, "remote HEAD unchanged, no build");
            return;
        }

        let build = BuildRequested {
            job_id: Some(request.job_id.clone()),
            immediate: request.immediate,
            reason: "webhook".to_string(),
            repo_url: Some(repo.url),
            branch: Some(request.branch.clone()),
            requested_at: Utc::now(),
        };
        if let Err(err) = self.bus.publish(build) {
            tracing::warn!(%err, "failed to publish build request");
        }
    }
}
