//! MarketMakingOrchestrator: the composition root for one session.
//!
//! Startup is strictly ordered: login, clear leftovers, seed, subscribe,
//! then start the scheduled jobs. A login or seed failure aborts before
//! any job runs. Shutdown stops the jobs, then the push tasks, and only
//! then cancels everything still in the ledger.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::actions::{self, CancelPassReport};
use super::cache::{MarketCache, SeedError};
use super::ledger::WagerLedger;
use super::scheduler::{ActionScheduler, FatalSignal, ScheduleSettings};
use super::shutdown::Shutdown;
use super::TradingContext;
use crate::auth::{AuthError, AuthSession};
use crate::exchange::ExchangeApi;
use crate::realtime::pusher::{ChannelBindings, PusherSettings, PusherSubscriber};
use crate::realtime::{self, PushMessage};
use crate::strategy::WagerPolicy;
use crate::types::SeedResult;

pub const DEFAULT_PUSH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct MarketMakerSettings {
    /// Tournament names to trade.
    pub tournaments: Vec<String>,
    pub stake: Decimal,
    pub schedule: ScheduleSettings,
    /// `None` runs without a push subscription.
    pub realtime: Option<PusherSettings>,
    pub push_channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    SessionLost,
}

/// Summary of one completed session.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub balance: Option<Decimal>,
    pub seed: SeedResult,
    pub final_cancel: CancelPassReport,
    pub reason: ShutdownReason,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error("session lost after {failures} consecutive renew failures: {last_error}")]
    SessionLost {
        failures: u32,
        last_error: String,
        report: Box<RunReport>,
    },
}

pub struct MarketMaker {
    ctx: Arc<TradingContext>,
    settings: MarketMakerSettings,
    shutdown: Shutdown,
    push_tx: mpsc::Sender<PushMessage>,
    push_rx: mpsc::Receiver<PushMessage>,
}

impl MarketMaker {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        auth: Arc<AuthSession>,
        policy: Arc<dyn WagerPolicy>,
        settings: MarketMakerSettings,
    ) -> Self {
        let ctx = Arc::new(TradingContext {
            api,
            auth,
            cache: Arc::new(MarketCache::new()),
            ledger: Arc::new(WagerLedger::new()),
            policy,
            stake: settings.stake,
        });
        let (push_tx, push_rx) = mpsc::channel(settings.push_channel_capacity.max(1));
        Self {
            ctx,
            settings,
            shutdown: Shutdown::new(),
            push_tx,
            push_rx,
        }
    }

    pub fn context(&self) -> Arc<TradingContext> {
        Arc::clone(&self.ctx)
    }

    /// Sender feeding the push consumer. The subscriber gets a clone; other
    /// producers may inject messages the same way.
    pub fn push_sender(&self) -> mpsc::Sender<PushMessage> {
        self.push_tx.clone()
    }

    /// Run one session until `signal` resolves or a job escalates.
    pub async fn run<S>(self, signal: S) -> Result<RunReport, OrchestratorError>
    where
        S: Future<Output = ()>,
    {
        let Self {
            ctx,
            settings,
            shutdown,
            push_tx,
            push_rx,
        } = self;

        // -- Startup ---------------------------------------------------------

        if let Err(e) = ctx.auth.login().await {
            error!(error = %e, "Login failed, aborting");
            return Err(e.into());
        }
        let header = ctx.auth.current_auth_header()?;

        match ctx.api.cancel_all_wagers(&header).await {
            Ok(()) => info!("Cleared wagers left by a previous session"),
            Err(e) => warn!(error = %e, "Startup cancel-all failed, continuing"),
        }

        let balance = match ctx.api.get_balance(&header).await {
            Ok(b) => {
                info!(balance = %b, "Account balance");
                Some(b)
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch balance");
                None
            }
        };

        let interest: HashSet<String> = settings.tournaments.iter().cloned().collect();
        let seed = match ctx.cache.seed(ctx.api.as_ref(), &header, &interest).await {
            Ok(seed) => seed,
            Err(e) => {
                error!(error = %e, "Initial seed failed, aborting");
                return Err(e.into());
            }
        };
        info!(%seed, "Market cache seeded");

        let consumer = tokio::spawn(realtime::run_consumer(
            push_rx,
            Arc::clone(&ctx.cache),
            Arc::clone(&ctx.ledger),
            shutdown.listener(),
        ));

        let subscriber = settings.realtime.clone().map(|pusher| {
            let bindings =
                ChannelBindings::new(ctx.auth.partner_id(), ctx.cache.tournament_ids());
            PusherSubscriber::new(
                Arc::clone(&ctx.api),
                Arc::clone(&ctx.auth),
                pusher,
                bindings,
                push_tx.clone(),
            )
            .spawn(shutdown.listener())
        });
        drop(push_tx);

        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let scheduler =
            ActionScheduler::start(Arc::clone(&ctx), &settings.schedule, &shutdown, fatal_tx);
        info!("Market maker running");

        // -- Steady state ------------------------------------------------------

        tokio::pin!(signal);
        let fatal = tokio::select! {
            _ = &mut signal => {
                info!("Shutdown signal received");
                None
            }
            Some(fatal) = fatal_rx.recv() => Some(fatal),
        };

        // -- Shutdown ----------------------------------------------------------

        shutdown.trigger();
        scheduler.join().await;
        if let Some(handle) = subscriber {
            if let Err(e) = handle.await {
                error!(error = %e, "Push subscriber panicked");
            }
        }
        if let Err(e) = consumer.await {
            error!(error = %e, "Push consumer panicked");
        }

        let final_cancel = actions::cancel_all_outstanding(&ctx).await;
        let report = RunReport {
            balance,
            seed,
            final_cancel,
            reason: match fatal {
                Some(_) => ShutdownReason::SessionLost,
                None => ShutdownReason::Signal,
            },
        };

        match fatal {
            None => {
                info!("Market maker stopped");
                Ok(report)
            }
            Some(FatalSignal::SessionLost {
                failures,
                last_error,
            }) => Err(OrchestratorError::SessionLost {
                failures,
                last_error,
                report: Box::new(report),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ApiError, MockExchangeApi};
    use crate::realtime::MarketUpdate;
    use crate::strategy::RandomPolicy;
    use crate::types::{Credentials, Market, SessionTokens, SportEvent, Tournament};
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use std::time::Duration;

    fn settings() -> MarketMakerSettings {
        MarketMakerSettings {
            tournaments: vec!["NBA".into()],
            stake: dec!(1.0),
            schedule: ScheduleSettings::default(),
            realtime: None,
            push_channel_capacity: 16,
        }
    }

    fn maker(api: MockExchangeApi) -> MarketMaker {
        let api: Arc<dyn ExchangeApi> = Arc::new(api);
        let auth = Arc::new(AuthSession::new(
            Arc::clone(&api),
            Credentials {
                access_key: "ak".into(),
                secret_key: SecretString::new("sk".into()),
            },
            "partner".into(),
            None,
        ));
        // Never bets or cancels on its own.
        let policy = Arc::new(RandomPolicy::new(0.0, 0.0, 0.0, vec![]));
        MarketMaker::new(api, auth, policy, settings())
    }

    fn ok_login(api: &mut MockExchangeApi) {
        api.expect_login().returning(|_| {
            Ok(SessionTokens {
                access_token: SecretString::new("tok".into()),
                refresh_token: None,
            })
        });
    }

    #[tokio::test]
    async fn test_login_failure_aborts_before_anything_else() {
        let mut api = MockExchangeApi::new();
        api.expect_login().returning(|_| {
            Err(ApiError::Status {
                endpoint: "login",
                status: 401,
                body: "bad key".into(),
            })
        });
        api.expect_cancel_all_wagers().never();
        api.expect_get_tournaments().never();

        let err = maker(api).run(std::future::pending()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Auth(AuthError::Rejected { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_seed_failure_aborts_before_jobs_start() {
        let mut api = MockExchangeApi::new();
        ok_login(&mut api);
        api.expect_cancel_all_wagers().returning(|_| {
            Err(ApiError::Status {
                endpoint: "cancel_all_wagers",
                status: 500,
                body: "".into(),
            })
        });
        api.expect_get_balance().returning(|_| Ok(dec!(10)));
        api.expect_get_tournaments().returning(|_| {
            Err(ApiError::Transport {
                endpoint: "get_tournaments",
                message: "timed out".into(),
            })
        });
        api.expect_place_wager().never();

        let err = maker(api).run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Seed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_runs_full_lifecycle_and_applies_pushes() {
        let mut api = MockExchangeApi::new();
        ok_login(&mut api);
        api.expect_cancel_all_wagers().times(1).returning(|_| Ok(()));
        api.expect_get_balance().returning(|_| Err(ApiError::Transport {
            endpoint: "get_balance",
            message: "reset".into(),
        }));
        api.expect_get_tournaments()
            .returning(|_| Ok(vec![Tournament { id: 3, name: "NBA".into() }]));
        api.expect_get_sport_events().returning(|_, _| {
            Ok(vec![SportEvent {
                event_id: 30,
                name: "A vs B".into(),
                tournament_id: Some(3),
                markets: Vec::new(),
            }])
        });
        api.expect_get_markets().returning(|_, _| Ok(Vec::new()));

        let maker = maker(api);
        let ctx = maker.context();
        let tx = maker.push_sender();

        let run = tokio::spawn(maker.run(tokio::time::sleep(Duration::from_secs(30))));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let update = MarketUpdate {
            event_id: 30,
            markets: vec![Market {
                market_type: "moneyline".into(),
                name: None,
                selections: Vec::new(),
            }],
        };
        tx.send(PushMessage::Market(update)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.cache.event(30).unwrap().markets.len(), 1);

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.reason, ShutdownReason::Signal);
        assert_eq!(report.balance, None);
        assert_eq!(report.seed.events_ingested, 1);
        assert_eq!(report.final_cancel.attempted(), 0);
    }
}
