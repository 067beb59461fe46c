//! Skip evaluation: decide whether a build can be short-circuited before
//! any destructive work happens.
//!
//! The evaluator runs before output cleaning and git syncing. It returns
//! a synthetic skipped report only when every guard holds: render
//! artifacts present, previous report intact (checksum match), config
//! unchanged, global and per-repo doc hashes unchanged, known commits for
//! every repo, and a matching builder version. Any failed guard means the
//! build proceeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::fingerprint::{file_sha256, sha256_hex};
use crate::state::SkipStateAccess;
use crate::types::{BuildReport, Repository};

/// Report file name under the output directory.
pub const REPORT_FILE: &str = "build-report.json";

/// Skip reason recorded on synthesized reports.
pub const SKIP_REASON_NO_CHANGES: &str = "no_changes";

/// Get the report file path for an output directory.
pub fn report_path(output_dir: &Path) -> PathBuf {
    output_dir.join(REPORT_FILE)
}

/// Read and parse the previous build report.
pub fn read_report(output_dir: &Path) -> Result<BuildReport> {
    let path = report_path(output_dir);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse report JSON from {}", path.display()))
}

/// Write a report to the output directory and persist its checksum as the
/// new last-report guard.
pub fn write_report(
    output_dir: &Path,
    report: &BuildReport,
    state: &dyn SkipStateAccess,
) -> Result<String> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let path = report_path(output_dir);
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(&path, &json)
        .with_context(|| format!("failed to write report {}", path.display()))?;

    let checksum = sha256_hex(json.as_bytes());
    state.set_last_report_checksum(&checksum);
    Ok(checksum)
}

/// Pre-build skip evaluation against persisted fingerprints.
pub struct SkipEvaluator {
    output_dir: PathBuf,
    current_config_hash: String,
    builder_version: String,
    state: Arc<dyn SkipStateAccess>,
}

impl SkipEvaluator {
    pub fn new(
        output_dir: PathBuf,
        current_config_hash: String,
        builder_version: String,
        state: Arc<dyn SkipStateAccess>,
    ) -> Self {
        Self {
            output_dir,
            current_config_hash,
            builder_version,
            state,
        }
    }

    /// Evaluate all guards. `Ok(Some(report))` means the build was
    /// skipped and the synthetic report was already written and its
    /// checksum persisted; `Ok(None)` means build as usual.
    pub fn evaluate(&self, repos: &[Repository]) -> Result<Option<BuildReport>> {
        let Some(prev) = self.guards_hold(repos)? else {
            return Ok(None);
        };

        let mut report = BuildReport::skipped(SKIP_REASON_NO_CHANGES, &self.builder_version);
        report.repositories = repos.len();
        report.files = prev.files;
        report.doc_files_hash = prev.doc_files_hash.clone();
        report.repo_doc_hashes = prev.repo_doc_hashes.clone();

        write_report(&self.output_dir, &report, self.state.as_ref())?;
        tracing::info!("all skip guards hold, skipping build");
        Ok(Some(report))
    }

    /// Check every guard; returns the previous report when all hold.
    fn guards_hold(&self, repos: &[Repository]) -> Result<Option<BuildReport>> {
        // Guard 1: prior render artifacts present.
        let public_dir = self.output_dir.join("public");
        if !self.output_dir.is_dir() || !dir_non_empty(&public_dir) {
            tracing::debug!("skip guard failed: no prior render artifacts");
            return Ok(None);
        }

        // Guard 2: previous report exists and its checksum matches.
        let path = report_path(&self.output_dir);
        if !path.is_file() {
            tracing::debug!("skip guard failed: no previous report");
            return Ok(None);
        }
        let checksum = file_sha256(&path)?;
        if self.state.last_report_checksum().as_deref() != Some(checksum.as_str()) {
            tracing::debug!("skip guard failed: report checksum mismatch");
            return Ok(None);
        }

        // Guard 3: configuration unchanged.
        if self.state.last_config_hash().as_deref() != Some(self.current_config_hash.as_str()) {
            tracing::debug!("skip guard failed: config hash changed");
            return Ok(None);
        }

        let prev = read_report(&self.output_dir)?;

        // Guard 4: global doc-files hash unchanged.
        if prev.doc_files_hash.is_empty()
            || self.state.last_global_doc_files_hash().as_deref()
                != Some(prev.doc_files_hash.as_str())
        {
            tracing::debug!("skip guard failed: global doc-files hash mismatch");
            return Ok(None);
        }

        // Guard 5: every repo has a known commit and an unchanged hash.
        for repo in repos {
            match self.state.repo_last_commit(&repo.url) {
                Some(commit) if !commit.is_empty() => {}
                _ => {
                    tracing::debug!(repo = %repo.url, "skip guard failed: unknown last commit");
                    return Ok(None);
                }
            }

            let expected = prev
                .repo_doc_hashes
                .get(&repo.url)
                .map(String::as_str)
                .unwrap_or(prev.doc_files_hash.as_str());
            if self.state.repo_doc_files_hash(&repo.url).as_deref() != Some(expected) {
                tracing::debug!(repo = %repo.url, "skip guard failed: repo doc hash mismatch");
                return Ok(None);
            }
        }

        // Guard 6: the builder that wrote the report is the one running.
        if prev.builder_version != self.builder_version {
            tracing::debug!(
                previous = %prev.builder_version,
                current = %self.builder_version,
                "skip guard failed: builder version changed"
            );
            return Ok(None);
        }

        Ok(Some(prev))
    }
}

fn dir_non_empty(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
