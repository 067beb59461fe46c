//! End-to-end flows through the wired daemon: webhook to build, skip on
//! unchanged inputs, scheduled syncs.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use docbuild::config::Config;
use docbuild::daemon::{Daemon, DaemonStatus};
use docbuild::events::{RepoUpdated, WebhookReceived};
use docbuild::fingerprint::doc_files_hash;
use docbuild::queue::Builder;
use docbuild::state::RepoStateAccess;
use docbuild::types::{
    BuildJob, BuildOutcome, BuildReport, JobStatus, JobSummary, JobType, Repository,
};
use docbuild::updater::{RemoteHead, RemoteHeadChecker};

const REPO_URL: &str = "https://h/org/r.git";

/// Builder that leaves behind everything the skip guards check.
struct SiteBuilder {
    output_dir: std::path::PathBuf,
    calls: AtomicUsize,
}

impl SiteBuilder {
    fn new(output_dir: std::path::PathBuf) -> Arc<Self> {
        Arc::new(Self {
            output_dir,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Builder for SiteBuilder {
    async fn build(&self, _cancel: &CancellationToken, job: &mut BuildJob) -> Result<BuildReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let public = self.output_dir.join("public");
        fs::create_dir_all(&public)?;
        fs::write(public.join("index.html"), "<html/>")?;

        // The builder glue records commits through the job's state handle.
        if let Some(state) = &job.metadata.state {
            for repo in &job.metadata.repositories {
                state.set_repo_last_commit(&repo.url, "c1");
            }
        }

        let now = Utc::now();
        let mut report = BuildReport::new(BuildOutcome::Success, now, now);
        report.repositories = job.metadata.repositories.len();
        report.doc_files_hash = doc_files_hash(Vec::<String>::new());
        report.builder_version = self.version();
        Ok(report)
    }

    fn version(&self) -> String {
        "site-builder 1.0".to_string()
    }
}

struct SwitchChecker {
    changed: AtomicBool,
}

impl SwitchChecker {
    fn new(changed: bool) -> Arc<Self> {
        Arc::new(Self {
            changed: AtomicBool::new(changed),
        })
    }
}

#[async_trait]
impl RemoteHeadChecker for SwitchChecker {
    async fn check_remote_changed(&self, _repo: &Repository, _branch: &str) -> Result<RemoteHead> {
        Ok(RemoteHead {
            changed: self.changed.load(Ordering::SeqCst),
            sha: "abc123".to_string(),
        })
    }
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.daemon.storage.repo_cache_dir = root.join("data");
    config.output.directory = root.join("out");
    config.daemon.build_debounce.quiet_window = Duration::from_millis(20);
    config.daemon.build_debounce.max_delay = Duration::from_millis(200);
    config.daemon.build_debounce.webhook_immediate = true;
    config.repositories.push(Repository::new(REPO_URL, "r"));
    config
}

fn webhook(files: &[&str]) -> WebhookReceived {
    WebhookReceived {
        job_id: "hook-1".to_string(),
        forge_name: "gitea".to_string(),
        repo_full_name: "org/r".to_string(),
        branch: "main".to_string(),
        changed_files: files.iter().map(|f| f.to_string()).collect(),
    }
}

async fn wait_for_history(daemon: &Arc<Daemon>) -> JobSummary {
    loop {
        if let Some(job) = daemon.queue().history().pop() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn webhook_with_docs_change_builds_the_site() {
    let td = tempfile::tempdir().expect("tempdir");
    let builder = SiteBuilder::new(config(td.path()).output_dir());
    let daemon = Arc::new(
        Daemon::new(config(td.path()), builder.clone(), SwitchChecker::new(true), None)
            .expect("daemon"),
    );
    daemon.start().await.expect("start");

    let (mut updated_rx, _sub) = daemon.bus().subscribe::<RepoUpdated>(8).expect("subscribe");

    daemon.bus().publish(webhook(&["docs/a.md", "README.md"])).expect("publish");

    let updated = updated_rx.recv().await.expect("repo updated");
    assert!(updated.changed);
    assert_eq!(updated.repo_url, REPO_URL);
    assert!(updated.immediate);

    let job = wait_for_history(&daemon).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.job_type, JobType::Webhook);
    assert_eq!(builder.calls(), 1);

    daemon.stop(Duration::from_secs(1)).await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn webhook_without_docs_change_is_ignored() {
    let td = tempfile::tempdir().expect("tempdir");
    let builder = SiteBuilder::new(config(td.path()).output_dir());
    let daemon = Arc::new(
        Daemon::new(config(td.path()), builder.clone(), SwitchChecker::new(true), None)
            .expect("daemon"),
    );
    daemon.start().await.expect("start");

    daemon.bus().publish(webhook(&["src/main.rs"])).expect("publish");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(daemon.queue().history().is_empty());
    assert_eq!(builder.calls(), 0);

    daemon.stop(Duration::from_secs(1)).await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn unchanged_remote_head_triggers_no_build() {
    let td = tempfile::tempdir().expect("tempdir");
    let builder = SiteBuilder::new(config(td.path()).output_dir());
    let daemon = Arc::new(
        Daemon::new(config(td.path()), builder.clone(), SwitchChecker::new(false), None)
            .expect("daemon"),
    );
    daemon.start().await.expect("start");

    let (mut updated_rx, _sub) = daemon.bus().subscribe::<RepoUpdated>(8).expect("subscribe");
    daemon.bus().publish(webhook(&["docs/a.md"])).expect("publish");

    let updated = updated_rx.recv().await.expect("repo updated");
    assert!(!updated.changed);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(daemon.queue().history().is_empty());
    assert_eq!(builder.calls(), 0);

    daemon.stop(Duration::from_secs(1)).await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn second_unchanged_build_is_skipped() {
    let td = tempfile::tempdir().expect("tempdir");
    let cfg = config(td.path());
    let builder = SiteBuilder::new(cfg.output_dir());
    let daemon = Arc::new(
        Daemon::new(cfg, builder.clone(), SwitchChecker::new(false), None).expect("daemon"),
    );
    daemon.start().await.expect("start");

    // First build establishes artifacts and fingerprints.
    daemon.request_build("initial");
    let first = wait_for_history(&daemon).await;
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(builder.calls(), 1);

    // Second request: every skip guard holds, the builder is not called.
    daemon.request_build("again");
    loop {
        if daemon.queue().history().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(builder.calls(), 1);
    let recent = daemon.recent_builds();
    assert_eq!(recent[0].skip_reason.as_deref(), Some("no_changes"));
    assert_eq!(recent[0].outcome, Some(BuildOutcome::Success));

    daemon.stop(Duration::from_secs(1)).await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn scheduled_syncs_request_builds() {
    let td = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(td.path());
    cfg.daemon.sync.schedule = Some("@every 100ms".parse().expect("schedule"));
    let builder = SiteBuilder::new(cfg.output_dir());
    let daemon = Arc::new(
        Daemon::new(cfg, builder.clone(), SwitchChecker::new(false), None).expect("daemon"),
    );
    daemon.start().await.expect("start");
    assert_eq!(daemon.status(), DaemonStatus::Running);

    // One schedule slot plus the debounce window.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(builder.calls() >= 1, "no scheduled build happened");

    daemon.stop(Duration::from_secs(1)).await.expect("stop");
    assert_eq!(daemon.status(), DaemonStatus::Stopped);
}
