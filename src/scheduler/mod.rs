//! Scheduler: triggers a reconciliation cycle on a cron schedule.
//!
//! Cycles run one after another on the same task, so a slow cycle delays the
//! next trigger instead of overlapping it. Cancellation wakes the loop from
//! its sleep; a cycle already running finishes its in-flight subscriptions.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cycle::{CycleOutcome, CycleRunner};

pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr).map_err(|e| anyhow!("Invalid cron expression {:?}: {}", expr, e))
}

/// Time to wait from `now` until the next trigger, `None` if the schedule has no future run.
fn next_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Duration)> {
    let next = schedule.after(&now).next()?;
    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
    Some((next, wait))
}

pub struct Scheduler {
    schedule: Schedule,
    runner: Arc<CycleRunner>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(schedule: Schedule, runner: Arc<CycleRunner>, cancel: CancellationToken) -> Self {
        Self {
            schedule,
            runner,
            cancel,
        }
    }

    /// Loop until cancelled. Cycle failures are logged and never end the loop.
    pub async fn run(&self) {
        info!("Scheduler: started");
        loop {
            let Some((next, wait)) = next_delay(&self.schedule, Utc::now()) else {
                warn!("Scheduler: schedule has no future runs, stopping");
                break;
            };
            debug!(
                "Scheduler: next cycle at {}",
                next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.runner.run_cycle().await {
                CycleOutcome::Completed(stats) if stats.cancelled => {
                    info!("Scheduler: cycle interrupted by shutdown");
                }
                CycleOutcome::Completed(_) => {}
                CycleOutcome::Failed { error, .. } => {
                    warn!("Scheduler: cycle failed, retrying at next trigger: {}", error);
                }
                CycleOutcome::Skipped => {
                    debug!("Scheduler: cycle skipped");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }
        info!("Scheduler: stopped");
    }
}
