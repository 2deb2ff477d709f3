//! ActionScheduler: three periodic jobs sharing one `TradingContext`.
//!
//! Each job runs on its own task and its own fixed interval. A tick's job
//! body always runs to completion; shutdown is observed before the next
//! tick. The renew job reports repeated failure on the fatal channel
//! rather than stopping anything itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::actions;
use super::shutdown::{Shutdown, ShutdownListener};
use super::TradingContext;

pub const DEFAULT_BET_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CANCEL_INTERVAL: Duration = Duration::from_secs(7);
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(8 * 60);
pub const DEFAULT_MAX_RENEW_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub bet_interval: Duration,
    pub cancel_interval: Duration,
    pub renew_interval: Duration,
    pub max_renew_failures: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            bet_interval: DEFAULT_BET_INTERVAL,
            cancel_interval: DEFAULT_CANCEL_INTERVAL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            max_renew_failures: DEFAULT_MAX_RENEW_FAILURES,
        }
    }
}

/// Raised by a job when the session can no longer continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalSignal {
    SessionLost { failures: u32, last_error: String },
}

/// Counts consecutive renew failures.
#[derive(Debug, Clone)]
pub struct RenewTracker {
    consecutive_failures: u32,
    max_failures: u32,
}

impl RenewTracker {
    pub fn new(max_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true once the failure limit has been reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

pub struct ActionScheduler {
    jobs: Vec<(&'static str, JoinHandle<()>)>,
}

impl ActionScheduler {
    /// Spawn the bet, cancel and renew jobs. The first run of each job
    /// happens one full period after start.
    pub fn start(
        ctx: Arc<TradingContext>,
        settings: &ScheduleSettings,
        shutdown: &Shutdown,
        fatal_tx: mpsc::Sender<FatalSignal>,
    ) -> Self {
        info!(
            bet_secs = settings.bet_interval.as_secs_f64(),
            cancel_secs = settings.cancel_interval.as_secs_f64(),
            renew_secs = settings.renew_interval.as_secs_f64(),
            "Starting scheduled jobs"
        );

        let bet_ctx = Arc::clone(&ctx);
        let bet = spawn_periodic(
            "bet",
            settings.bet_interval,
            shutdown.listener(),
            move |listener| {
                let ctx = Arc::clone(&bet_ctx);
                async move {
                    actions::place_wagers(&ctx, &listener).await;
                }
            },
        );

        let cancel_ctx = Arc::clone(&ctx);
        let cancel = spawn_periodic(
            "cancel",
            settings.cancel_interval,
            shutdown.listener(),
            move |listener| {
                let ctx = Arc::clone(&cancel_ctx);
                async move {
                    actions::cancel_wagers(&ctx, &listener).await;
                }
            },
        );

        let renew = spawn_renew(
            ctx,
            settings.renew_interval,
            settings.max_renew_failures,
            shutdown.listener(),
            fatal_tx,
        );

        Self {
            jobs: vec![("bet", bet), ("cancel", cancel), ("renew", renew)],
        }
    }

    /// Wait for every job to observe shutdown and finish its current run.
    pub async fn join(self) {
        for (name, handle) in self.jobs {
            if let Err(e) = handle.await {
                error!(job = name, error = %e, "Scheduled job panicked");
            }
        }
        debug!("All scheduled jobs stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownListener,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut(ShutdownListener) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = interval.tick() => job(shutdown.clone()).await,
            }
        }
        debug!(job = name, "Job stopped");
    })
}

fn spawn_renew(
    ctx: Arc<TradingContext>,
    period: Duration,
    max_failures: u32,
    mut shutdown: ShutdownListener,
    fatal_tx: mpsc::Sender<FatalSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        let mut tracker = RenewTracker::new(max_failures);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    match ctx.auth.refresh().await {
                        Ok(session) => {
                            tracker.record_success();
                            debug!(expires_at = %session.expires_at, "Session renewed");
                        }
                        Err(e) => {
                            let escalate = tracker.record_failure();
                            warn!(
                                consecutive_failures = tracker.consecutive_failures(),
                                error = %e,
                                "Session renewal failed"
                            );
                            if escalate {
                                error!(
                                    failures = tracker.consecutive_failures(),
                                    "Session renewal failing repeatedly, requesting shutdown"
                                );
                                let signal = FatalSignal::SessionLost {
                                    failures: tracker.consecutive_failures(),
                                    last_error: e.to_string(),
                                };
                                let _ = fatal_tx.send(signal).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!(job = "renew", "Job stopped");
    })
}
