//! Durable daemon state: the fingerprints that feed skip and delta
//! decisions.
//!
//! The store is a single process-wide instance with internal locking.
//! Mutations overwrite (never accumulate), so a crash is recovered by the
//! next successful build re-establishing every fingerprint. Persistence is
//! an atomic JSON file: write to a temp file, then rename.
//!
//! Consumers take the narrow capability trait they need
//! ([`SkipStateAccess`], [`RepoStateAccess`], [`StateLifecycle`]) rather
//! than the whole store; [`StateAccess`] is the union the daemon wires in.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default state file name inside the daemon's state directory.
pub const STATE_FILE: &str = "state.json";

/// Get the state file path for a state directory.
pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Persisted facts about one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoState {
    /// Commit SHA of the last successful build of this repo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    /// Doc-files hash at the last successful build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_files_hash: Option<String>,
    /// Relative doc-file paths at the last successful build; enables
    /// deletion detection under partial rebuilds.
    #[serde(default)]
    pub doc_file_paths: Vec<String>,
    #[serde(default)]
    pub document_count: usize,
    #[serde(default)]
    pub build_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_built_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_global_doc_files_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_report_checksum: Option<String>,
    #[serde(default)]
    repositories: BTreeMap<String, RepoState>,
}

/// Read/write access the skip evaluator needs.
pub trait SkipStateAccess: Send + Sync {
    fn repo_last_commit(&self, url: &str) -> Option<String>;
    fn repo_doc_files_hash(&self, url: &str) -> Option<String>;
    fn last_config_hash(&self) -> Option<String>;
    fn set_last_config_hash(&self, hash: &str);
    fn last_report_checksum(&self) -> Option<String>;
    fn set_last_report_checksum(&self, checksum: &str);
    fn last_global_doc_files_hash(&self) -> Option<String>;
    fn set_last_global_doc_files_hash(&self, hash: &str);
}

/// Per-repo bookkeeping written after builds and during deletion
/// detection.
pub trait RepoStateAccess: Send + Sync {
    fn repo_doc_file_paths(&self, url: &str) -> Option<Vec<String>>;
    fn set_repo_doc_file_paths(&self, url: &str, paths: Vec<String>);
    fn set_repo_doc_files_hash(&self, url: &str, hash: &str);
    fn set_repo_document_count(&self, url: &str, count: usize);
    fn increment_repo_build(&self, url: &str);
    fn set_repo_last_commit(&self, url: &str, sha: &str);
    /// Create an empty entry for the repo if none exists.
    fn ensure_repository_state(&self, url: &str);
    /// Drop the repo's entry entirely (repo removed from the site).
    fn remove_repository_state(&self, url: &str);
    /// All repo URLs with persisted state.
    fn repo_urls(&self) -> Vec<String>;
}

/// Load/save lifecycle of the store.
pub trait StateLifecycle: Send + Sync {
    fn load(&self) -> Result<()>;
    fn save(&self) -> Result<()>;
    fn is_loaded(&self) -> bool;
    fn last_saved(&self) -> Option<DateTime<Utc>>;
}

/// Union of all state capabilities; what the daemon hands out.
pub trait StateAccess: SkipStateAccess + RepoStateAccess + StateLifecycle {}

impl<T: SkipStateAccess + RepoStateAccess + StateLifecycle> StateAccess for T {}

struct StoreInner {
    state: PersistedState,
    loaded: bool,
    last_saved: Option<DateTime<Utc>>,
}

/// File-backed state store.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInner")
            .field("loaded", &self.loaded)
            .field("repositories", &self.state.repositories.len())
            .finish()
    }
}

impl FileStateStore {
    /// Create a store persisting to `<state_dir>/state.json`. Nothing is
    /// read until [`StateLifecycle::load`].
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_path(state_dir),
            inner: RwLock::new(StoreInner {
                state: PersistedState::default(),
                loaded: false,
                last_saved: None,
            }),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().expect("state lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().expect("state lock poisoned")
    }

    fn with_repo<F: FnOnce(&mut RepoState)>(&self, url: &str, f: F) {
        let mut inner = self.write();
        let repo = inner.state.repositories.entry(url.to_string()).or_default();
        f(repo);
    }
}

impl SkipStateAccess for FileStateStore {
    fn repo_last_commit(&self, url: &str) -> Option<String> {
        self.read().state.repositories.get(url)?.last_commit.clone()
    }

    fn repo_doc_files_hash(&self, url: &str) -> Option<String> {
        self.read().state.repositories.get(url)?.doc_files_hash.clone()
    }

    fn last_config_hash(&self) -> Option<String> {
        self.read().state.last_config_hash.clone()
    }

    fn set_last_config_hash(&self, hash: &str) {
        self.write().state.last_config_hash = Some(hash.to_string());
    }

    fn last_report_checksum(&self) -> Option<String> {
        self.read().state.last_report_checksum.clone()
    }

    fn set_last_report_checksum(&self, checksum: &str) {
        self.write().state.last_report_checksum = Some(checksum.to_string());
    }

    fn last_global_doc_files_hash(&self) -> Option<String> {
        self.read().state.last_global_doc_files_hash.clone()
    }

    fn set_last_global_doc_files_hash(&self, hash: &str) {
        self.write().state.last_global_doc_files_hash = Some(hash.to_string());
    }
}

impl RepoStateAccess for FileStateStore {
    fn repo_doc_file_paths(&self, url: &str) -> Option<Vec<String>> {
        let inner = self.read();
        let repo = inner.state.repositories.get(url)?;
        if repo.doc_file_paths.is_empty() {
            None
        } else {
            Some(repo.doc_file_paths.clone())
        }
    }

    fn set_repo_doc_file_paths(&self, url: &str, paths: Vec<String>) {
        self.with_repo(url, |repo| repo.doc_file_paths = paths);
    }

    fn set_repo_doc_files_hash(&self, url: &str, hash: &str) {
        self.with_repo(url, |repo| repo.doc_files_hash = Some(hash.to_string()));
    }

    fn set_repo_document_count(&self, url: &str, count: usize) {
        self.with_repo(url, |repo| repo.document_count = count);
    }

    fn increment_repo_build(&self, url: &str) {
        self.with_repo(url, |repo| {
            repo.build_count += 1;
            repo.last_built_at = Some(Utc::now());
        });
    }

    fn set_repo_last_commit(&self, url: &str, sha: &str) {
        self.with_repo(url, |repo| repo.last_commit = Some(sha.to_string()));
    }

    fn ensure_repository_state(&self, url: &str) {
        self.with_repo(url, |_| {});
    }

    fn remove_repository_state(&self, url: &str) {
        self.write().state.repositories.remove(url);
    }

    fn repo_urls(&self) -> Vec<String> {
        self.read().state.repositories.keys().cloned().collect()
    }
}

impl StateLifecycle for FileStateStore {
    /// Load state from disk. A missing file is not an error: the store
    /// starts empty and is considered loaded.
    fn load(&self) -> Result<()> {
        let state = if self.path.exists() {
            let content = fs::read_to_string(&self.path)
                .with_context(|| format!("failed to read state file {}", self.path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse state JSON from {}", self.path.display()))?
        } else {
            PersistedState::default()
        };

        let mut inner = self.write();
        inner.state = state;
        inner.loaded = true;
        Ok(())
    }

    /// Persist state atomically: serialize, write a temp file, rename.
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {}", parent.display()))?;
        }

        let json = {
            let inner = self.read();
            serde_json::to_string_pretty(&inner.state).context("failed to serialize state")?
        };

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write state file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename state file to {}", self.path.display()))?;

        self.write().last_saved = Some(Utc::now());
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.read().last_saved
    }
}
