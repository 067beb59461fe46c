//! Build debouncer: coalesces bursts of [`BuildRequested`] into single,
//! exactly-timed [`BuildNow`] emissions.
//!
//! A burst ends when the quiet window elapses with no new requests, or
//! when the max-delay ceiling is hit counting from the burst's first
//! request. Emission is additionally gated on a build-running predicate:
//! while a build runs, the burst is held and a poll timer watches for the
//! predicate to flip, after which exactly one follow-up `BuildNow` fires
//! with cause `after_running`.
//!
//! The loop is a single task driven by channel selects; timers live in
//! the loop and are never touched from outside. Cancelling the loop
//! discards any pending coalescing without emitting.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::events::{BuildNow, BuildRequested, DebounceCause};

/// Default interval for polling the build-running predicate while a burst
/// is held back.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timing knobs for the debouncer.
#[derive(Debug, Clone)]
pub struct DebouncerOptions {
    pub quiet_window: Duration,
    pub max_delay: Duration,
    pub poll_interval: Duration,
}

impl DebouncerOptions {
    pub fn new(quiet_window: Duration, max_delay: Duration) -> Self {
        Self {
            quiet_window,
            max_delay,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Predicate: is a build currently running?
pub type BuildRunningCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Optional allocator for the emitted event's planned job id.
pub type JobIdAllocator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct DebounceState {
    pending: bool,
    pending_after_run: bool,
    polling_after_run: bool,
    first_request_at: Option<DateTime<Utc>>,
    last_request_at: Option<DateTime<Utc>>,
    last_reason: String,
    last_repo_url: Option<String>,
    request_count: u32,
}

/// Introspection snapshot of the debouncer's coalescing state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebounceSnapshot {
    pub pending: bool,
    pub pending_after_run: bool,
    pub request_count: u32,
    pub first_request_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// The coalescing scheduler between build triggers and the build queue.
pub struct BuildDebouncer {
    bus: EventBus,
    opts: DebouncerOptions,
    check_running: BuildRunningCheck,
    allocate_job_id: Option<JobIdAllocator>,
    state: Mutex<DebounceState>,
}

impl BuildDebouncer {
    /// Construct a debouncer. Fails when either window is zero.
    pub fn new(
        bus: EventBus,
        opts: DebouncerOptions,
        check_running: BuildRunningCheck,
    ) -> Result<Self> {
        if opts.quiet_window.is_zero() {
            bail!("debouncer quiet window must be positive");
        }
        if opts.max_delay.is_zero() {
            bail!("debouncer max delay must be positive");
        }
        let opts = DebouncerOptions {
            poll_interval: if opts.poll_interval.is_zero() {
                DEFAULT_POLL_INTERVAL
            } else {
                opts.poll_interval
            },
            ..opts
        };
        Ok(Self {
            bus,
            opts,
            check_running,
            allocate_job_id: None,
            state: Mutex::new(DebounceState::default()),
        })
    }

    /// Pre-allocate job ids on emitted [`BuildNow`] events.
    pub fn with_job_id_allocator(mut self, allocate: JobIdAllocator) -> Self {
        self.allocate_job_id = Some(allocate);
        self
    }

    /// Current coalescing state, for status surfaces.
    pub fn snapshot(&self) -> DebounceSnapshot {
        let state = self.state.lock().expect("debounce lock poisoned");
        DebounceSnapshot {
            pending: state.pending,
            pending_after_run: state.pending_after_run,
            request_count: state.request_count,
            first_request_at: state.first_request_at,
            last_request_at: state.last_request_at,
        }
    }

    /// Subscribe to [`BuildRequested`] on the bus passed at construction.
    ///
    /// Callers subscribe before spawning [`run`](Self::run) so no request
    /// published in between is lost.
    pub fn subscribe(
        &self,
    ) -> Result<(mpsc::Receiver<BuildRequested>, crate::bus::Subscription), crate::bus::BusError>
    {
        self.bus.subscribe::<BuildRequested>(64)
    }

    /// Run the debounce loop over `rx` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, mut rx: mpsc::Receiver<BuildRequested>) {
        let mut quiet: Option<Pin<Box<Sleep>>> = None;
        let mut max: Option<Pin<Box<Sleep>>> = None;
        let mut poll: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Discard any pending coalescing without emitting.
                    let mut state = self.state.lock().expect("debounce lock poisoned");
                    *state = DebounceState::default();
                    break;
                }
                evt = rx.recv() => {
                    let Some(evt) = evt else { break };
                    let first_of_burst = self.on_request(&evt);
                    quiet = Some(Box::pin(tokio::time::sleep(self.opts.quiet_window)));
                    if first_of_burst {
                        max = Some(Box::pin(tokio::time::sleep(self.opts.max_delay)));
                    }
                }
                _ = armed(&mut quiet) => {
                    quiet = None;
                    if !self.try_emit(DebounceCause::Quiet) {
                        max = None;
                        poll = Some(Box::pin(tokio::time::sleep(self.opts.poll_interval)));
                    } else {
                        max = None;
                        poll = None;
                    }
                }
                _ = armed(&mut max) => {
                    max = None;
                    if !self.try_emit(DebounceCause::MaxDelay) {
                        quiet = None;
                        poll = Some(Box::pin(tokio::time::sleep(self.opts.poll_interval)));
                    } else {
                        quiet = None;
                        poll = None;
                    }
                }
                _ = armed(&mut poll) => {
                    poll = None;
                    let should_poll = {
                        let mut state = self.state.lock().expect("debounce lock poisoned");
                        if state.pending_after_run {
                            state.polling_after_run = true;
                            true
                        } else {
                            false
                        }
                    };
                    if should_poll {
                        if (self.check_running)() {
                            poll = Some(Box::pin(tokio::time::sleep(self.opts.poll_interval)));
                        } else if !self.try_emit(DebounceCause::AfterRunning) {
                            poll = Some(Box::pin(tokio::time::sleep(self.opts.poll_interval)));
                        }
                    }
                }
            }
        }
    }

    /// Fold one request into the pending burst. Returns whether it opened
    /// a new burst.
    fn on_request(&self, evt: &BuildRequested) -> bool {
        let mut state = self.state.lock().expect("debounce lock poisoned");
        let now = Utc::now();
        if !state.pending {
            state.pending = true;
            state.first_request_at = Some(now);
            state.request_count = 0;
        }
        state.last_request_at = Some(now);
        state.last_reason = evt.reason.clone();
        state.last_repo_url = evt.repo_url.clone();
        state.request_count += 1;
        state.request_count == 1
    }

    /// Attempt to emit a [`BuildNow`] for the pending burst.
    ///
    /// Returns `true` when there is nothing left to do (emitted, or no
    /// burst pending) and `false` when emission is blocked on a running
    /// build and the caller should start polling.
    fn try_emit(&self, cause: DebounceCause) -> bool {
        let event = {
            let mut state = self.state.lock().expect("debounce lock poisoned");
            if !state.pending {
                return true;
            }
            if (self.check_running)() {
                state.pending_after_run = true;
                tracing::debug!(cause = cause.as_str(), "build running, holding burst");
                return false;
            }

            let now = Utc::now();
            let event = BuildNow {
                triggered_at: now,
                request_count: state.request_count,
                last_reason: state.last_reason.clone(),
                last_repo_url: state.last_repo_url.clone(),
                first_request: state.first_request_at.unwrap_or(now),
                last_request: state.last_request_at.unwrap_or(now),
                cause,
                planned_job_id: self.allocate_job_id.as_ref().map(|f| f()),
            };
            *state = DebounceState::default();
            event
        };

        tracing::debug!(
            cause = cause.as_str(),
            requests = event.request_count,
            "emitting coalesced build trigger"
        );
        if let Err(err) = self.bus.publish(event) {
            // The trigger source re-publishes if it still cares.
            tracing::warn!(%err, "failed to publish build trigger");
        }
        true
    }
}

/// Await an optional timer; never resolves while disarmed.
async fn armed(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
