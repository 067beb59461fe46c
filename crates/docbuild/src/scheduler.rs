//! Sync scheduler: fires the daemon's periodic tick from an `@every`
//! interval or a cron expression.
//!
//! Ticks run in singleton-reschedule mode: a tick whose predecessor is
//! still running is skipped, never executed concurrently. The next slot
//! picks the work back up.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docbuild_duration::ScheduleSpec;

/// Driver for one schedule, generic over the tick handler.
pub struct Scheduler {
    spec: ScheduleSpec,
}

impl Scheduler {
    pub fn new(spec: ScheduleSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    /// Run until `cancel` fires. `handler` is invoked once per due tick;
    /// an invocation that outlives its slot suppresses the ticks it
    /// overlaps.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, handler: F)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut current: Option<JoinHandle<()>> = None;

        match &self.spec {
            ScheduleSpec::Every(interval) => {
                let start = tokio::time::Instant::now() + *interval;
                let mut ticker = tokio::time::interval_at(start, *interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            fire(&mut current, &handler);
                        }
                    }
                }
            }
            ScheduleSpec::Cron(_) => loop {
                let now = Utc::now();
                let Some(next) = self.spec.next_after(now) else {
                    tracing::warn!("cron schedule has no future fire time, stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        fire(&mut current, &handler);
                    }
                }
            },
        }

        if let Some(handle) = current {
            handle.abort();
        }
    }
}

/// Start a tick unless the previous one is still running.
fn fire<F, Fut>(current: &mut Option<JoinHandle<()>>, handler: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if let Some(handle) = current
        && !handle.is_finished()
    {
        tracing::debug!("previous scheduled tick still running, rescheduling");
        return;
    }
    *current = Some(tokio::spawn(handler()));
}
