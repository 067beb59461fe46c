use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use docbuild::config::{CONFIG_FILE, Config};
use docbuild::daemon::Daemon;
use docbuild::eventstore::{DEFAULT_RECENT_CAP, EventStore};
use docbuild::queue::Builder;
use docbuild::state::{FileStateStore, RepoStateAccess, SkipStateAccess, StateLifecycle};
use docbuild::types::{BuildJob, BuildOutcome, BuildReport, Repository, StageError};
use docbuild::updater::{RemoteHead, RemoteHeadChecker};

#[derive(Parser, Debug)]
#[command(name = "docbuild", version)]
#[command(about = "Documentation-build daemon: webhook- and schedule-driven site rebuilds")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon until interrupted.
    Daemon {
        /// Site generator command, e.g. "hugo --minify". Run once per
        /// build with the output directory appended via `-d`.
        #[arg(long, default_value = "hugo")]
        site_command: String,

        /// Shutdown deadline once an interrupt is received.
        #[arg(long, default_value = "30s")]
        stop_timeout: String,
    },
    /// Print persisted daemon state and recent builds.
    Status,
    /// Print environment and configuration diagnostics.
    Doctor,
}

/// Site builder that shells out to an external generator command.
struct CommandSiteBuilder {
    program: String,
    args: Vec<String>,
}

impl CommandSiteBuilder {
    fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("site command must not be empty");
        };
        Ok(Self {
            program: program.to_string(),
            args: parts.map(String::from).collect(),
        })
    }
}

#[async_trait]
impl Builder for CommandSiteBuilder {
    async fn build(&self, cancel: &CancellationToken, job: &mut BuildJob) -> Result<BuildReport> {
        let start = Utc::now();
        let output_dir = job
            .metadata
            .config
            .as_ref()
            .map(|c| c.output_dir())
            .unwrap_or_else(|| PathBuf::from("site"));

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg("-d")
            .arg(output_dir.join("public"))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn site generator {:?}", self.program))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(BuildReport::new(BuildOutcome::Canceled, start, Utc::now()));
            }
            output = child.wait_with_output() => {
                output.context("failed to wait for site generator")?
            }
        };

        let end = Utc::now();
        let mut report = BuildReport::new(BuildOutcome::Success, start, end);
        report.repositories = job.metadata.repositories.len();
        report.builder_version = self.version();
        report.stage_durations_ms.insert(
            "generate".to_string(),
            (end - start).num_milliseconds().max(0) as u64,
        );

        if !output.status.success() {
            report.outcome = BuildOutcome::Failed;
            report.errors.push(StageError {
                stage: "generate".to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                transient: false,
            });
        }
        Ok(report)
    }

    fn version(&self) -> String {
        format!("{} (docbuild {})", self.program, env!("CARGO_PKG_VERSION"))
    }
}

/// Remote-HEAD checker backed by `git ls-remote`, with an in-memory
/// cache of the last observed SHA per repo.
struct GitHeadChecker {
    seen: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl GitHeadChecker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }
}

#[async_trait]
impl RemoteHeadChecker for GitHeadChecker {
    async fn check_remote_changed(&self, repo: &Repository, branch: &str) -> Result<RemoteHead> {
        let reference = if branch.is_empty() {
            "HEAD".to_string()
        } else {
            format!("refs/heads/{branch}")
        };

        let output = tokio::process::Command::new("git")
            .args(["ls-remote", &repo.url, &reference])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run git ls-remote")?;

        if !output.status.success() {
            bail!(
                "git ls-remote failed for {}: {}",
                repo.url,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let sha = stdout
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if sha.is_empty() {
            bail!("git ls-remote returned no ref for {} {}", repo.url, reference);
        }

        let mut seen = self.seen.lock().expect("head cache lock poisoned");
        let changed = seen.get(&repo.url).map(String::as_str) != Some(sha.as_str());
        seen.insert(repo.url.clone(), sha.clone());
        Ok(RemoteHead { changed, sha })
    }
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn run_daemon(config: Config, site_command: &str, stop_timeout: &str) -> Result<()> {
    let stop_timeout = docbuild_duration::parse_duration(stop_timeout)?;
    let builder = Arc::new(CommandSiteBuilder::parse(site_command)?);
    let checker = GitHeadChecker::new();

    let daemon = Arc::new(Daemon::new(config, builder, checker, None)?);
    daemon.start().await?;
    tracing::info!("daemon running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("interrupt received, shutting down");
    daemon.stop(stop_timeout).await?;
    Ok(())
}

fn print_status(config: &Config) -> Result<()> {
    let state_dir = config.state_dir();
    let state = FileStateStore::new(&state_dir);
    state.load()?;

    println!("state dir: {}", state_dir.display());
    println!(
        "config hash: {}",
        state.last_config_hash().as_deref().unwrap_or("<none>")
    );
    println!(
        "global doc hash: {}",
        state.last_global_doc_files_hash().as_deref().unwrap_or("<none>")
    );

    let urls = state.repo_urls();
    println!("repositories: {}", urls.len());
    for url in urls {
        let commit = state.repo_last_commit(&url).unwrap_or_else(|| "<unknown>".to_string());
        println!("  {url} @ {commit}");
    }

    let events = EventStore::open(&state_dir, DEFAULT_RECENT_CAP)?;
    let recent = events.recent_builds();
    println!("recent builds: {}", recent.len());
    for build in recent.iter().take(10) {
        let outcome = build
            .outcome
            .map(|o| format!("{o:?}").to_lowercase())
            .unwrap_or_else(|| "running".to_string());
        println!(
            "  {} [{}] {} {}",
            build.started_at.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            build.job_id,
            build.skip_reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_doctor(config_path: &PathBuf, config: &Config) {
    println!("docbuild {}", env!("CARGO_PKG_VERSION"));
    println!("build profile: {}", env!("DOCBUILD_BUILD_PROFILE"));
    println!("rustc: {}", env!("DOCBUILD_RUSTC_VERSION"));
    println!();
    println!(
        "config file: {} ({})",
        config_path.display(),
        if config_path.exists() { "found" } else { "missing, defaults in use" }
    );
    println!("state dir: {}", config.state_dir().display());
    println!("output dir: {}", config.output_dir().display());
    println!("explicit repositories: {}", config.repositories.len());
    println!("forges: {}", config.forges.len());
    println!(
        "sync schedule: {}",
        config
            .daemon
            .sync
            .schedule
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<disabled>".to_string())
    );

    let git = std::process::Command::new("git").arg("--version").output();
    match git {
        Ok(out) if out.status.success() => {
            println!("git: {}", String::from_utf8_lossy(&out.stdout).trim());
        }
        _ => println!("git: NOT FOUND (webhook-triggered updates will fail)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match &cli.cmd {
        Commands::Daemon {
            site_command,
            stop_timeout,
        } => run_daemon(config, site_command, stop_timeout).await,
        Commands::Status => print_status(&config),
        Commands::Doctor => {
            print_doctor(&cli.config, &config);
            Ok(())
        }
    }
}
