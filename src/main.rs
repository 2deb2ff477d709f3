//! prophet-mm: Prophet exchange market maker
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the exchange client and session, and runs one market-making
//! session until Ctrl+C, cancelling every open wager on the way out.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use prophet_mm::auth::AuthSession;
use prophet_mm::config;
use prophet_mm::engine::orchestrator::{MarketMaker, OrchestratorError, RunReport};
use prophet_mm::exchange::prophet::ProphetClient;
use prophet_mm::exchange::ExchangeApi;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("PROPHET_MM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    info!(
        base_url = %cfg.exchange.base_url,
        tournaments = ?cfg.market_making.tournaments,
        stake = %cfg.market_making.stake,
        realtime = cfg.realtime.enabled,
        "prophet-mm starting up"
    );

    // -- Initialise components -------------------------------------------

    let api: Arc<dyn ExchangeApi> = Arc::new(ProphetClient::new(
        &cfg.exchange.base_url,
        Some(cfg.request_timeout()),
    )?);

    let auth = Arc::new(AuthSession::new(
        Arc::clone(&api),
        cfg.credentials()?,
        cfg.partner_id()?,
        Some(cfg.session_ttl()),
    ));

    let maker = MarketMaker::new(
        api,
        auth,
        Arc::new(cfg.policy()),
        cfg.market_maker_settings(),
    );

    info!("Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    match maker.run(shutdown).await {
        Ok(report) => {
            log_run_report(&report);
            info!("prophet-mm shut down cleanly.");
            Ok(())
        }
        Err(OrchestratorError::SessionLost {
            failures,
            last_error,
            report,
        }) => {
            log_run_report(&report);
            error!(failures, %last_error, "Session lost, shut down after cancelling open wagers");
            anyhow::bail!("session lost after {failures} consecutive renew failures")
        }
        Err(e) => Err(e.into()),
    }
}

/// Log a human-readable session summary.
fn log_run_report(report: &RunReport) {
    let cancel = &report.final_cancel;
    info!(
        balance = ?report.balance,
        seed = %report.seed,
        cancelled = cancel.cancelled.len(),
        already_gone = cancel.already_gone.len(),
        cancel_failed = cancel.failed.len(),
        abandoned = cancel.abandoned.len(),
        reason = ?report.reason,
        "Session complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prophet_mm=info"));

    let json_logging = std::env::var("PROPHET_MM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
