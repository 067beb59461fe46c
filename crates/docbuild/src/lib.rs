//! # Docbuild
//!
//! Core orchestration engine for a long-running documentation-build
//! daemon.
//!
//! Docbuild turns a stream of build triggers — scheduled ticks, forge
//! webhooks, config reloads, manual requests — into an ordered series of
//! executed build jobs, while guaranteeing at most one concurrent build
//! per site, coalescing bursts, skipping builds whose inputs are
//! provably unchanged, and publishing lifecycle events to subscribers.
//!
//! ## Pipeline
//!
//! ```text
//! scheduled tick ─┐
//! webhook ────────┼─► BuildRequested ─► debouncer ─► BuildNow ─► queue ─► worker ─► Builder
//! config reload ──┤                                                │
//! manual request ─┘                                                └─► lifecycle events + state
//! ```
//!
//! 1. Trigger sources publish [`events::BuildRequested`] on the
//!    [`bus::EventBus`].
//! 2. The [`debounce::BuildDebouncer`] coalesces bursts: a quiet window
//!    ends a burst, a max-delay ceiling bounds it, and emission waits for
//!    any running build to finish.
//! 3. The daemon turns each [`events::BuildNow`] into a job on the
//!    [`queue::BuildQueue`], whose workers drive the pluggable
//!    [`queue::Builder`] with retry on transient stage errors.
//! 4. Around the builder, the [`skip::SkipEvaluator`] short-circuits
//!    no-change builds and the [`delta::DeltaAnalyzer`] prunes partial
//!    ones, both backed by fingerprints in the [`state`] store.
//!
//! ## Key types
//!
//! - [`daemon::Daemon`] — the orchestrator owning lifecycle and wiring
//! - [`types::BuildJob`] / [`types::BuildReport`] — the unit of work and
//!   its result
//! - [`queue::Builder`] — the external site generator contract
//! - [`state::StateAccess`] — capability union over persisted
//!   fingerprints
//! - [`config::Config`] — `docbuild.toml` configuration
//!
//! ## Modules
//!
//! - [`bus`] — typed pub/sub with bounded per-subscriber queues
//! - [`config`] — configuration loading, validation, config hash
//! - [`daemon`] — orchestrator, discovery cache, orchestrated builder
//! - [`debounce`] — quiet-window/max-delay burst coalescer
//! - [`delta`] — full/partial classification and deletion detection
//! - [`events`] — orchestration event structs
//! - [`eventstore`] — append-only lifecycle log + recent-builds view
//! - [`fingerprint`] — SHA-256 content fingerprints
//! - [`health`] — health assessment for status surfaces
//! - [`queue`] — bounded FIFO build queue and worker pool
//! - [`scheduler`] — cron/`@every` tick source with singleton reschedule
//! - [`skip`] — pre-build skip guards
//! - [`state`] — persisted fingerprint store behind capability traits
//! - [`types`] — domain types
//! - [`updater`] — remote-HEAD probe loop
//! - [`webhook`] — webhook-to-repo matching
//! - [`workers`] — stoppable background worker group

/// Typed pub/sub with bounded per-subscriber queues.
pub mod bus;

/// Configuration loading, validation, and the config hash.
pub mod config;

/// Daemon orchestrator and discovery cache.
pub mod daemon;

/// Quiet-window/max-delay burst coalescer.
pub mod debounce;

/// Full/partial build classification and deletion detection.
pub mod delta;

/// Orchestration event structs.
pub mod events;

/// Append-only job-lifecycle log with a recent-builds projection.
pub mod eventstore;

/// SHA-256 content fingerprints over files and path lists.
pub mod fingerprint;

/// Health assessment for status surfaces.
pub mod health;

/// Bounded FIFO build queue and worker pool.
pub mod queue;

/// Cron/`@every` tick source with singleton reschedule.
pub mod scheduler;

/// Pre-build skip guards.
pub mod skip;

/// Persisted fingerprint store behind capability traits.
pub mod state;

/// Domain types: jobs, reports, plans, repositories.
pub mod types;

/// Remote-HEAD probe loop.
pub mod updater;

/// Webhook-to-repo matching and docs-path filtering.
pub mod webhook;

/// Stoppable background worker group.
pub mod workers;

/// Retry backoff policy, re-exported from the docbuild-retry microcrate.
pub use docbuild_retry as retry;

/// Duration and schedule parsing, re-exported from the docbuild-duration
/// microcrate.
pub use docbuild_duration as duration;
