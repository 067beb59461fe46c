//! Webhook consumer: match inbound forge notifications to known repos
//! and request an update probe when the change touches documentation.
//!
//! Matching is tolerant by design: a webhook can identify a repo by URL
//! suffix (`owner/repo` with or without `.git`), by its short name, or by
//! a `full_name` metadata tag from discovery. When the payload carries a
//! changed-file list, at least one file must live under the repo's docs
//! paths; pushes that only touch code are ignored.

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::ForgeConfig;
use crate::events::{RepoUpdateRequested, WebhookReceived};
use crate::types::Repository;
use crate::updater::RepoSetProvider;

/// Consumer loop for [`WebhookReceived`] events.
pub struct WebhookConsumer {
    bus: EventBus,
    repos: RepoSetProvider,
    forges: Vec<ForgeConfig>,
    webhook_immediate: bool,
}

impl WebhookConsumer {
    pub fn new(
        bus: EventBus,
        repos: RepoSetProvider,
        forges: Vec<ForgeConfig>,
        webhook_immediate: bool,
    ) -> Self {
        Self {
            bus,
            repos,
            forges,
            webhook_immediate,
        }
    }

    /// Subscribe to [`WebhookReceived`]; call before spawning
    /// [`run`](Self::run) so no webhook published in between is lost.
    pub fn subscribe(
        &self,
    ) -> Result<
        (
            tokio::sync::mpsc::Receiver<WebhookReceived>,
            crate::bus::Subscription,
        ),
        crate::bus::BusError,
    > {
        self.bus.subscribe::<WebhookReceived>(32)
    }

    /// Run over `rx` until `cancel` fires.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut rx: tokio::sync::mpsc::Receiver<WebhookReceived>,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                evt = rx.recv() => match evt {
                    Some(evt) => evt,
                    None => return,
                },
            };
            if let Some(request) = self.evaluate(&event)
                && let Err(err) = self.bus.publish(request)
            {
                tracing::warn!(%err, "failed to publish repo update request");
            }
        }
    }

    /// Decide whether a webhook should trigger an update probe.
    ///
    /// Returns the request to publish, or `None` when the webhook does
    /// not concern a known repo's documentation. A repo set that is still
    /// empty (discovery has not run yet) simply produces no match;
    /// subscribers re-resolve after the next discovery cycle.
    pub fn evaluate(&self, event: &WebhookReceived) -> Option<RepoUpdateRequested> {
        let repo = self.match_repo(event)?;

        if !event.changed_files.is_empty() && !touches_docs(&repo, &event.changed_files) {
            tracing::debug!(
                repo = %repo.url,
                "webhook changed no documentation files, ignoring"
            );
            return None;
        }

        Some(RepoUpdateRequested {
            job_id: event.job_id.clone(),
            immediate: self.webhook_immediate,
            repo_url: repo.url,
            branch: event.branch.clone(),
        })
    }

    /// Find the repo a webhook refers to.
    pub fn match_repo(&self, event: &WebhookReceived) -> Option<Repository> {
        let forge_host = self
            .forges
            .iter()
            .find(|f| f.name == event.forge_name)
            .and_then(ForgeConfig::host);

        (self.repos)().into_iter().find(|repo| {
            if let Some(host) = &forge_host
                && url_host(&repo.url).as_deref() != Some(host.as_str())
            {
                return false;
            }
            matches_full_name(repo, &event.repo_full_name)
        })
    }
}

fn matches_full_name(repo: &Repository, full_name: &str) -> bool {
    if full_name.is_empty() {
        return false;
    }
    let url = repo.url.trim_end_matches('/');
    if url.ends_with(&format!("/{full_name}.git")) || url.ends_with(&format!("/{full_name}")) {
        return true;
    }
    if repo.name == full_name {
        return true;
    }
    repo.tags.get("full_name").map(String::as_str) == Some(full_name)
}

/// Does any changed file live under the repo's docs paths?
fn touches_docs(repo: &Repository, changed_files: &[String]) -> bool {
    let docs_paths: Vec<String> = repo
        .effective_docs_paths()
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| !p.is_empty())
        .collect();

    changed_files.iter().any(|file| {
        let file = normalize_path(file);
        docs_paths
            .iter()
            .any(|docs| file == *docs || file.starts_with(&format!("{docs}/")))
    })
}

/// Strip `./`, leading `/`, and trailing `/` so prefix tests line up.
fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    loop {
        let trimmed = path
            .strip_prefix("./")
            .or_else(|| path.strip_prefix('/'))
            .unwrap_or(path);
        if trimmed == path {
            break;
        }
        path = trimmed;
    }
    path.trim_end_matches('/').to_string()
}

fn url_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("ssh://"))?;
    let host = rest.split('/').next()?.split('@').next_back()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
