//! Cron-driven firing of flywheel cycles, plus manual triggers.
//!
//! At most one cycle runs at a time: a firing that finds a cycle in flight is skipped,
//! and a manual trigger gets `Conflict`. Stopping the scheduler prevents future firings
//! but never interrupts a cycle that has already started.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{CycleRunner, CycleSummary};
use crate::error::{FlywheelError, Result};
use crate::TARGET_FLYWHEEL;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule: String,
    pub cycle_in_progress: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_summary: Option<CycleSummary>,
}

#[derive(Default)]
struct State {
    stop: Option<watch::Sender<bool>>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_summary: Option<CycleSummary>,
}

struct Inner {
    runner: Arc<dyn CycleRunner>,
    schedule: Schedule,
    expression: String,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one cycle. Callers hold the cycle lock.
    async fn execute(&self) -> Result<CycleSummary> {
        let started = Utc::now();
        let result = self.runner.run_cycle().await;

        let mut state = self.state();
        state.last_run = Some(started);
        match &result {
            Ok(summary) => {
                state.last_error = None;
                state.last_summary = Some(summary.clone());
            }
            Err(e) => {
                error!(target: TARGET_FLYWHEEL, "Flywheel cycle failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
        result
    }
}

async fn run_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    info!(target: TARGET_FLYWHEEL, "Scheduler loop started ({})", inner.expression);
    loop {
        let Some(next) = inner.schedule.upcoming(Utc).next() else {
            warn!(target: TARGET_FLYWHEEL, "Schedule '{}' has no upcoming firings", inner.expression);
            let mut state = inner.state();
            // `stop()` sends under the state lock, so an unsignalled receiver means the
            // sender in the state is still ours.
            if !*stop.borrow() {
                state.stop = None;
                state.next_run = None;
            }
            break;
        };
        inner.state().next_run = Some(next);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = sleep(wait) => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        match inner.cycle_lock.clone().try_lock_owned() {
            Ok(_guard) => {
                info!(target: TARGET_FLYWHEEL, "Scheduled flywheel cycle firing");
                // Failures are recorded in the state; the next firing is unaffected.
                let _ = inner.execute().await;
            }
            Err(_) => {
                warn!(target: TARGET_FLYWHEEL, "Previous cycle still running, skipping this firing");
            }
        }
    }
    info!(target: TARGET_FLYWHEEL, "Scheduler loop stopped");
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// `expression` is a cron expression with a leading seconds field.
    pub fn new(runner: Arc<dyn CycleRunner>, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            FlywheelError::Config(format!("invalid schedule '{}': {}", expression, e))
        })?;
        Ok(Scheduler {
            inner: Arc::new(Inner {
                runner,
                schedule,
                expression: expression.to_string(),
                cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
                state: Mutex::new(State::default()),
            }),
        })
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state();
        if state.stop.is_some() {
            return Err(FlywheelError::Conflict("scheduler is already running".into()));
        }
        let (tx, rx) = watch::channel(false);
        tokio::spawn(run_loop(self.inner.clone(), rx));
        state.stop = Some(tx);
        info!(target: TARGET_FLYWHEEL, "Scheduler started with schedule {}", self.inner.expression);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.inner.state();
        let Some(stop) = state.stop.take() else {
            return Err(FlywheelError::Conflict("scheduler is not running".into()));
        };
        // The loop may already be gone if the schedule ran dry.
        let _ = stop.send(true);
        state.next_run = None;
        info!(target: TARGET_FLYWHEEL, "Scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().stop.is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let cycle_in_progress = self.inner.cycle_lock.try_lock().is_err();
        let state = self.inner.state();
        SchedulerStatus {
            running: state.stop.is_some(),
            schedule: self.inner.expression.clone(),
            cycle_in_progress,
            last_run: state.last_run,
            next_run: state.next_run,
            last_error: state.last_error.clone(),
            last_summary: state.last_summary.clone(),
        }
    }

    /// Runs one cycle now and waits for it.
    pub async fn trigger_now(&self) -> Result<CycleSummary> {
        let _guard = self.try_claim()?;
        info!(target: TARGET_FLYWHEEL, "Manual flywheel cycle triggered");
        self.inner.execute().await
    }

    /// Starts one cycle in the background and returns at once.
    pub fn trigger_in_background(&self) -> Result<()> {
        let guard = self.try_claim()?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let _ = inner.execute().await;
        });
        Ok(())
    }

    fn try_claim(&self) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        self.inner
            .cycle_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| FlywheelError::Conflict("a flywheel cycle is already running".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const EVERY_SECOND: &str = "* * * * * *";
    const YEARLY: &str = "0 0 0 1 1 *";
    const LONG_GONE: &str = "0 0 0 1 1 * 2000";

    struct CountingRunner {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingRunner {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(CountingRunner {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(&self) -> Result<CycleSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            if self.fail {
                return Err(FlywheelError::Upstream("everything is down".into()));
            }
            Ok(CycleSummary {
                collected: 1,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        let runner = CountingRunner::new(Duration::ZERO, false);
        assert!(matches!(
            Scheduler::new(runner, "every four hours"),
            Err(FlywheelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop_conflicts() {
        let scheduler = Scheduler::new(CountingRunner::new(Duration::ZERO, false), YEARLY).unwrap();
        assert!(matches!(scheduler.stop(), Err(FlywheelError::Conflict(_))));

        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(FlywheelError::Conflict(_))));
        assert!(scheduler.is_running());

        sleep(Duration::from_millis(20)).await;
        let status = scheduler.status();
        assert!(status.running);
        assert!(status.next_run.is_some());
        assert_eq!(status.schedule, YEARLY);

        scheduler.stop().unwrap();
        assert!(matches!(scheduler.stop(), Err(FlywheelError::Conflict(_))));
        assert!(!scheduler.status().running);
        scheduler.start().unwrap();
        scheduler.stop().unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_schedule_stops_running() {
        let scheduler = Scheduler::new(CountingRunner::new(Duration::ZERO, false), LONG_GONE).unwrap();
        scheduler.start().unwrap();

        sleep(Duration::from_millis(50)).await;
        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.next_run.is_none());
        assert!(matches!(scheduler.stop(), Err(FlywheelError::Conflict(_))));

        // A dry schedule can still be started again.
        scheduler.start().unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_manual_trigger_while_running_conflicts() {
        let runner = CountingRunner::new(Duration::from_millis(200), false);
        let scheduler = Scheduler::new(runner.clone(), YEARLY).unwrap();

        scheduler.trigger_in_background().unwrap();
        sleep(Duration::from_millis(20)).await;
        assert!(scheduler.status().cycle_in_progress);
        assert!(matches!(
            scheduler.trigger_now().await,
            Err(FlywheelError::Conflict(_))
        ));

        sleep(Duration::from_millis(300)).await;
        let summary = scheduler.trigger_now().await.unwrap();
        assert_eq!(summary.collected, 1);
        assert_eq!(runner.calls(), 2);
        assert!(scheduler.status().last_run.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_firings_survive_failures() {
        let runner = CountingRunner::new(Duration::ZERO, true);
        let scheduler = Scheduler::new(runner.clone(), EVERY_SECOND).unwrap();
        scheduler.start().unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert!(runner.calls() >= 2, "only {} firings", runner.calls());
        let status = scheduler.status();
        assert!(status.last_error.is_some());
        assert!(status.last_run.is_some());

        scheduler.stop().unwrap();
        sleep(Duration::from_millis(50)).await;
        let after_stop = runner.calls();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.calls(), after_stop);
    }
}
