//! End-to-end sessions against the in-memory exchange.
//!
//! Every test runs on a paused clock: the first bet tick fires at 5s, the
//! first cancel tick at 7s, so a signal at 6s stops the session after
//! exactly one bet pass.

use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use prophet_mm::auth::AuthSession;
use prophet_mm::engine::orchestrator::{
    MarketMaker, MarketMakerSettings, OrchestratorError, ShutdownReason,
};
use prophet_mm::engine::scheduler::ScheduleSettings;
use prophet_mm::exchange::ExchangeApi;
use prophet_mm::realtime::{PushMessage, WagerUpdate};
use prophet_mm::strategy::{WagerPolicy, DEFAULT_ALLOWED_ODDS};
use prophet_mm::types::{Credentials, Market, Selection, SportEvent, Wager};

use crate::mock_exchange::{market, moneyline, MockExchange};

/// Bets on every selection, never cancels on its own.
struct BetEverything;

impl WagerPolicy for BetEverything {
    fn act_on_market(&self, _: &SportEvent, _: &Market) -> bool {
        true
    }
    fn bet_on_selection(&self, _: &Market, _: &Selection) -> bool {
        true
    }
    fn choose_odds(&self, _: &Selection) -> i32 {
        -DEFAULT_ALLOWED_ODDS[3]
    }
    fn cancel_wager(&self, _: &Wager) -> bool {
        false
    }
}

fn settings(tournaments: &[&str]) -> MarketMakerSettings {
    MarketMakerSettings {
        tournaments: tournaments.iter().map(|s| s.to_string()).collect(),
        stake: dec!(1.0),
        schedule: ScheduleSettings {
            bet_interval: Duration::from_secs(5),
            cancel_interval: Duration::from_secs(7),
            renew_interval: Duration::from_secs(60),
            max_renew_failures: 3,
        },
        realtime: None,
        push_channel_capacity: 64,
    }
}

fn maker(exchange: &Arc<MockExchange>, tournaments: &[&str]) -> MarketMaker {
    let api: Arc<dyn ExchangeApi> = exchange.clone();
    let auth = Arc::new(AuthSession::new(
        Arc::clone(&api),
        Credentials {
            access_key: "access".into(),
            secret_key: SecretString::new("secret".into()),
        },
        "1234-abcd".into(),
        None,
    ));
    MarketMaker::new(api, auth, Arc::new(BetEverything), settings(tournaments))
}

/// Two tournaments of interest with one event each; one event has a
/// two-sided moneyline, the other only a spread. A third tournament is
/// not of interest.
fn two_tournaments() -> MockExchange {
    MockExchange::new()
        .with_event((1, "NBA"), 10, vec![moneyline(&["home", "away"])])
        .with_event((2, "NFL"), 20, vec![market("spread", &["s1", "s2"])])
        .with_event((3, "MLB"), 30, vec![moneyline(&["x", "y"])])
}

#[tokio::test(start_paused = true)]
async fn test_one_bet_pass_then_cancel_all_on_signal() {
    let exchange = Arc::new(two_tournaments());
    let report = maker(&exchange, &["NBA", "NFL"])
        .run(tokio::time::sleep(Duration::from_secs(6)))
        .await
        .unwrap();

    assert_eq!(exchange.bulk_cancels.load(Ordering::SeqCst), 1);
    assert_eq!(report.balance, Some(dec!(1000)));
    assert_eq!(report.seed.tournaments_found, 2);
    assert_eq!(report.seed.events_ingested, 2);

    let placed = exchange.placed();
    assert_eq!(placed.len(), 2);
    let ids: HashSet<_> = placed.iter().map(|p| p.external_id.clone()).collect();
    assert_eq!(ids.len(), 2);
    for p in &placed {
        assert!(DEFAULT_ALLOWED_ODDS.contains(&p.odds.abs()));
        assert_eq!(p.stake, dec!(1.0));
        assert!(p.line_id == "home" || p.line_id == "away");
    }

    // Every placed wager is cancelled exactly once at shutdown.
    let cancelled: HashSet<_> = exchange
        .cancelled()
        .into_iter()
        .map(|c| c.external_id)
        .collect();
    assert_eq!(cancelled, ids);
    assert_eq!(report.final_cancel.cancelled.len(), 2);
    assert_eq!(report.reason, ShutdownReason::Signal);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_three_placed_issues_three_cancels() {
    let exchange = Arc::new(
        MockExchange::new().with_event((1, "NBA"), 10, vec![moneyline(&["a", "b", "c"])]),
    );
    let report = maker(&exchange, &["NBA"])
        .run(tokio::time::sleep(Duration::from_secs(6)))
        .await
        .unwrap();

    assert_eq!(exchange.placed().len(), 3);
    assert_eq!(exchange.cancelled().len(), 3);
    assert_eq!(report.final_cancel.attempted(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_placement_is_not_cancelled() {
    let exchange = Arc::new(two_tournaments());
    exchange.reject_line("away");

    let report = maker(&exchange, &["NBA", "NFL"])
        .run(tokio::time::sleep(Duration::from_secs(6)))
        .await
        .unwrap();

    assert_eq!(exchange.placed().len(), 2);
    let cancelled = exchange.cancelled();
    assert_eq!(cancelled.len(), 1);
    let home = exchange
        .placed()
        .into_iter()
        .find(|p| p.line_id == "home")
        .unwrap();
    assert_eq!(cancelled[0].external_id, home.external_id);
    assert_eq!(report.final_cancel.cancelled.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_final_cancel_is_best_effort() {
    let exchange = Arc::new(
        MockExchange::new().with_event((1, "NBA"), 10, vec![moneyline(&["a", "b", "c"])]),
    );
    // Wager ids are issued 1, 2, 3 in placement order.
    exchange.cancel_responds("2", 404);
    exchange.cancel_responds("3", 500);

    let report = maker(&exchange, &["NBA"])
        .run(tokio::time::sleep(Duration::from_secs(6)))
        .await
        .unwrap();

    // One attempt each, no retries.
    assert_eq!(exchange.cancelled().len(), 3);
    assert_eq!(report.final_cancel.cancelled.len(), 1);
    assert_eq!(report.final_cancel.already_gone.len(), 1);
    assert_eq!(report.final_cancel.failed.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_close_removes_wager_before_final_cancel() {
    let exchange = Arc::new(
        MockExchange::new().with_event((1, "NBA"), 10, vec![moneyline(&["a", "b"])]),
    );
    let maker = maker(&exchange, &["NBA"]);
    let tx = maker.push_sender();

    let watched = Arc::clone(&exchange);
    let signal = async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        let first = watched.placed().remove(0);
        tx.send(PushMessage::Wager(WagerUpdate {
            external_id: first.external_id,
            wager_id: None,
            status: "settled".into(),
        }))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    let report = maker.run(signal).await.unwrap();

    assert_eq!(exchange.placed().len(), 2);
    assert_eq!(exchange.cancelled().len(), 1);
    assert_eq!(report.final_cancel.cancelled.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_aborts_session() {
    let exchange = Arc::new(two_tournaments());
    exchange.allow_logins(0);

    let err = maker(&exchange, &["NBA"])
        .run(std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Auth(_)));
    assert_eq!(exchange.bulk_cancels.load(Ordering::SeqCst), 0);
    assert!(exchange.placed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_renew_failure_escalates_after_cancel_all() {
    let exchange = Arc::new(
        MockExchange::new().with_event((1, "NBA"), 10, vec![moneyline(&["a"])]),
    );
    // The startup login succeeds; every renewal after that fails.
    exchange.allow_logins(1);

    let err = maker(&exchange, &["NBA"])
        .run(std::future::pending())
        .await
        .unwrap_err();

    let (failures, report) = match err {
        OrchestratorError::SessionLost {
            failures, report, ..
        } => (failures, report),
        other => panic!("expected SessionLost, got {other:?}"),
    };
    assert_eq!(failures, 3);
    assert_eq!(report.reason, ShutdownReason::SessionLost);
    // 1 startup login + 3 failed renewals.
    assert_eq!(exchange.logins.load(Ordering::SeqCst), 4);
    // Bet ticks kept running until escalation; every wager they placed
    // was cancelled on the way out with the still-installed token.
    let placed = exchange.placed().len();
    assert!(placed > 0);
    assert_eq!(exchange.cancelled().len(), placed);
}
