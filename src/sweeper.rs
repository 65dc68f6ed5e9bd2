use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::observability::{SWEEP_ACTIONS_TOTAL, SWEEP_DURATION_SECONDS};

/// What one sweep tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub reminded: usize,
    pub expired: usize,
    pub force_checked_out: usize,
    /// Spaces that could not be processed this tick.
    pub failed: usize,
}

/// Periodic expiry scheduler. Every forced transition goes through the same
/// engine calls a user action would, against the state the sweep observed.
pub struct Sweeper {
    engine: Arc<Engine>,
    /// Bookings already reminded, when reminders are sent once.
    reminded: HashSet<Ulid>,
}

/// A user action got there first. Not a failure.
fn lost_race(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::Conflict(_) | EngineError::WrongState { .. } | EngineError::NotDue(_)
    )
}

impl Sweeper {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            reminded: HashSet::new(),
        }
    }

    /// Run the reminder, expire and force-checkout sweeps once.
    pub async fn tick(&mut self) -> SweepReport {
        let started = Instant::now();
        let now = self.engine.now();
        let mut report = SweepReport::default();

        // 1. Reminders
        let due = self.engine.collect_due_reminders(now);
        let remind_once = self.engine.config().remind_once;
        if remind_once {
            let still_due: HashSet<Ulid> = due.iter().map(|d| d.booking_id).collect();
            self.reminded.retain(|id| still_due.contains(id));
        }
        for d in &due {
            if remind_once && !self.reminded.insert(d.booking_id) {
                continue;
            }
            match self.engine.remind(d).await {
                Ok(()) => {
                    report.reminded += 1;
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "remind", "outcome" => "ok").increment(1);
                }
                Err(e) if lost_race(&e) => debug!("reminder skip {}: {e}", d.space_id),
                Err(e) => {
                    report.failed += 1;
                    warn!(space = %d.space_id, "reminder failed: {e}");
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "remind", "outcome" => e.code()).increment(1);
                }
            }
        }

        // 2. Lapsed bookings
        for space in self.engine.collect_lapsed_claims(now) {
            match self.engine.expire_observed(&space).await {
                Ok(_) => {
                    report.expired += 1;
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "expire", "outcome" => "ok").increment(1);
                }
                Err(e) if lost_race(&e) => debug!("expire skip {}: {e}", space.id),
                Err(e) => {
                    report.failed += 1;
                    warn!(space = %space.id, "expire failed: {e}");
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "expire", "outcome" => e.code()).increment(1);
                }
            }
        }

        // 3. Overlong occupancies
        for space in self.engine.collect_overdue_occupancies(now) {
            match self.engine.force_check_out_observed(&space).await {
                Ok(_) => {
                    report.force_checked_out += 1;
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "force_check_out", "outcome" => "ok")
                        .increment(1);
                }
                Err(e) if lost_race(&e) => debug!("force check-out skip {}: {e}", space.id),
                Err(e) => {
                    report.failed += 1;
                    warn!(space = %space.id, "force check-out failed: {e}");
                    metrics::counter!(SWEEP_ACTIONS_TOTAL, "sweep" => "force_check_out", "outcome" => e.code())
                        .increment(1);
                }
            }
        }

        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report != SweepReport::default() {
            info!(
                reminded = report.reminded,
                expired = report.expired,
                force_checked_out = report.force_checked_out,
                failed = report.failed,
                "sweep finished"
            );
        }
        report
    }

    /// Tick every `sweep_interval` until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.engine.config().sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    debug!("sweeper stopped");
                    return;
                }
            }
        }
    }
}
