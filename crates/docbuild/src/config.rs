//! Daemon configuration: loading, defaults, validation, and the config
//! hash that feeds the skip evaluator.
//!
//! Configuration lives in a `docbuild.toml` file. Every section has serde
//! defaults so a minimal file (or none at all) yields a runnable config.
//! [`Config::config_hash`] is a deterministic SHA-256 over the fields that
//! materially affect build output; cosmetic knobs (queue sizes, debounce
//! windows) deliberately stay out of it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use docbuild_duration::ScheduleSpec;
use docbuild_retry::{RetryBackoff, RetryPolicy};

use crate::fingerprint::sha256_hex;
use crate::types::Repository;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "docbuild.toml";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub build: BuildConfig,
    /// Explicitly configured repositories. Empty means discovery-driven.
    #[serde(default)]
    pub repositories: Vec<Repository>,
    /// Forges to discover repositories from.
    #[serde(default)]
    pub forges: Vec<ForgeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub build_debounce: DebounceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Sync schedule: cron expression or `@every <duration>`. `None`
    /// disables scheduled syncs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    /// Number of build workers.
    #[serde(default = "default_concurrent_builds")]
    pub concurrent_builds: usize,
    /// Build queue capacity.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_concurrent_builds() -> usize {
    2
}

fn default_queue_size() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule: None,
            concurrent_builds: default_concurrent_builds(),
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet window: a burst ends when this much time passes with no new
    /// request.
    #[serde(default = "default_quiet_window")]
    #[serde(with = "humantime_serde")]
    pub quiet_window: Duration,
    /// Hard ceiling: a burst is flushed this long after its first
    /// request even if requests keep arriving.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Forwarded on webhook-triggered events; does not shrink the
    /// debounce windows.
    #[serde(default)]
    pub webhook_immediate: bool,
}

fn default_quiet_window() -> Duration {
    Duration::from_secs(30)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_window: default_quiet_window(),
            max_delay: default_max_delay(),
            webhook_immediate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persistent workspace root: state file, event log, repo checkouts.
    #[serde(default = "default_repo_cache_dir")]
    pub repo_cache_dir: PathBuf,
}

fn default_repo_cache_dir() -> PathBuf {
    PathBuf::from("./daemon-data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repo_cache_dir: default_repo_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Site output directory; relative paths resolve under
    /// `base_directory`.
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<PathBuf>,
    /// Remove stale output before a full build.
    #[serde(default)]
    pub clean: bool,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("site")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            base_directory: None,
            clean: false,
        }
    }
}

/// How repo checkouts are kept between builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStrategy {
    /// Clone into a scratch dir for every build.
    Fresh,
    /// Keep checkouts under the cache dir and fetch into them (default).
    #[default]
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    #[serde(default = "default_retry_initial_delay")]
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,
    #[serde(default = "default_retry_max_delay")]
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Allow skipping a build when every fingerprint guard holds.
    #[serde(default = "default_true")]
    pub skip_if_unchanged: bool,
    /// Detect doc-file deletions in unchanged repos during partial builds.
    #[serde(default = "default_true")]
    pub detect_deletions: bool,
    #[serde(default)]
    pub clone_strategy: CloneStrategy,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff: RetryBackoff::default(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
            skip_if_unchanged: true,
            detect_deletions: true,
            clone_strategy: CloneStrategy::default(),
        }
    }
}

impl BuildConfig {
    /// The retry policy these knobs describe, validated with fallback.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: self.retry_backoff,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            max_retries: self.max_retries,
        }
        .validated()
    }
}

/// An upstream forge to discover repositories from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeConfig {
    pub name: String,
    /// Base URL, e.g. `https://codeberg.org`.
    pub base_url: String,
}

impl ForgeConfig {
    /// Host portion of the base URL, for webhook source matching.
    pub fn host(&self) -> Option<String> {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .or_else(|| self.base_url.strip_prefix("http://"))
            .unwrap_or(&self.base_url);
        let host = rest.split('/').next()?.split('@').next_back()?;
        let host = host.split(':').next()?;
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }
}

/// Canonical subset of the config that affects build output. Hashed for
/// the skip evaluator's config guard.
#[derive(Serialize)]
struct MaterialConfig<'a> {
    repositories: &'a [Repository],
    forges: &'a [ForgeConfig],
    output_directory: String,
    clean: bool,
    clone_strategy: CloneStrategy,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs_read(path)?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.sync.concurrent_builds == 0 {
            bail!("daemon.sync.concurrent_builds must be at least 1");
        }
        if self.daemon.sync.queue_size == 0 {
            bail!("daemon.sync.queue_size must be at least 1");
        }
        if self.daemon.build_debounce.quiet_window.is_zero() {
            bail!("daemon.build_debounce.quiet_window must be positive");
        }
        if self.daemon.build_debounce.max_delay.is_zero() {
            bail!("daemon.build_debounce.max_delay must be positive");
        }
        Ok(())
    }

    /// Directory holding the state file and event log.
    pub fn state_dir(&self) -> PathBuf {
        self.daemon.storage.repo_cache_dir.clone()
    }

    /// Resolved site output directory.
    pub fn output_dir(&self) -> PathBuf {
        if self.output.directory.is_absolute() {
            return self.output.directory.clone();
        }
        match &self.output.base_directory {
            Some(base) => base.join(&self.output.directory),
            None => self.output.directory.clone(),
        }
    }

    /// On-disk checkout location for a repository.
    pub fn repo_workspace_dir(&self, repo: &Repository) -> PathBuf {
        let subdir = match self.build.clone_strategy {
            CloneStrategy::Persistent => "repos",
            CloneStrategy::Fresh => "work",
        };
        self.daemon.storage.repo_cache_dir.join(subdir).join(&repo.name)
    }

    /// Deterministic hash over the fields that materially affect output.
    pub fn config_hash(&self) -> String {
        let material = MaterialConfig {
            repositories: &self.repositories,
            forges: &self.forges,
            output_directory: self.output_dir().to_string_lossy().into_owned(),
            clean: self.output.clean,
            clone_strategy: self.build.clone_strategy,
        };
        let json = serde_json::to_string(&material).expect("config serialization is infallible");
        sha256_hex(json.as_bytes())
    }

    /// Whether any forges are configured (discovery-driven mode).
    pub fn has_forges(&self) -> bool {
        !self.forges.is_empty()
    }

    /// Whether explicit repositories are configured.
    pub fn has_explicit_repos(&self) -> bool {
        !self.repositories.is_empty()
    }
}

fn fs_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))
}
