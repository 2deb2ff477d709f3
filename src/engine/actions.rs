//! Job bodies: place, cancel and cancel-all passes.
//!
//! A single failed exchange call abandons only that one action; the ledger
//! is left consistent and the pass continues with the next item.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::LedgerError;
use super::shutdown::ShutdownListener;
use super::TradingContext;
use crate::types::{CancelWagerRequest, PlaceWagerRequest, WagerStatus};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of one bet pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BetPassReport {
    pub placed: Vec<String>,
    pub rejected: Vec<String>,
}

impl BetPassReport {
    pub fn attempted(&self) -> usize {
        self.placed.len() + self.rejected.len()
    }
}

/// Result of one cancel pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelPassReport {
    pub cancelled: Vec<String>,
    pub already_gone: Vec<String>,
    pub failed: Vec<String>,
    /// Pending entries dropped because they never received a server id.
    pub abandoned: Vec<String>,
}

impl CancelPassReport {
    pub fn attempted(&self) -> usize {
        self.cancelled.len() + self.already_gone.len() + self.failed.len()
    }
}

/// Outcome of cancelling a single wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The exchange reported 404, or the ledger had already resolved it.
    AlreadyGone,
    Failed,
    /// Not in a cancellable state (pending or another cancel in flight).
    Skipped,
}

// ---------------------------------------------------------------------------
// Bet pass
// ---------------------------------------------------------------------------

/// Walk every cached moneyline market and place wagers the policy selects.
pub async fn place_wagers(ctx: &TradingContext, shutdown: &ShutdownListener) -> BetPassReport {
    let mut report = BetPassReport::default();

    for event in ctx.cache.events_snapshot() {
        for market in event.moneyline_markets() {
            if !ctx.policy.act_on_market(&event, market) {
                continue;
            }

            for selection in &market.selections {
                if shutdown.is_triggered() {
                    debug!("Shutdown requested, ending bet pass early");
                    return report;
                }
                if !ctx.policy.bet_on_selection(market, selection) {
                    continue;
                }

                let request = PlaceWagerRequest {
                    external_id: Uuid::new_v4().to_string(),
                    line_id: selection.line_id.clone(),
                    odds: ctx.policy.choose_odds(selection),
                    stake: ctx.stake,
                };
                info!(
                    event = %event.name,
                    selection = %selection.name,
                    odds = request.odds,
                    external_id = %request.external_id,
                    "Placing moneyline wager"
                );

                if place_one(ctx, &request).await {
                    report.placed.push(request.external_id);
                } else {
                    report.rejected.push(request.external_id);
                }
            }
        }
    }

    if report.attempted() > 0 {
        info!(
            placed = report.placed.len(),
            rejected = report.rejected.len(),
            open = ctx.ledger.len(),
            "Bet pass complete"
        );
    }
    report
}

async fn place_one(ctx: &TradingContext, request: &PlaceWagerRequest) -> bool {
    if let Err(e) = ctx.ledger.record_pending(&request.external_id) {
        warn!(error = %e, "Could not record pending wager");
        return false;
    }

    let header = match ctx.auth.current_auth_header() {
        Ok(h) => h,
        Err(e) => {
            warn!(external_id = %request.external_id, error = %e, "No session, wager abandoned");
            ctx.ledger.mark_rejected(&request.external_id);
            return false;
        }
    };

    match ctx.api.place_wager(&header, request).await {
        Ok(wager_id) => {
            match ctx.ledger.confirm_placed(&request.external_id, &wager_id) {
                Ok(()) => debug!(external_id = %request.external_id, %wager_id, "Wager placed"),
                // A push already closed it; nothing left to track.
                Err(LedgerError::NotFound(_)) => debug!(
                    external_id = %request.external_id,
                    %wager_id,
                    "Wager closed before placement was confirmed"
                ),
                Err(e) => warn!(error = %e, "Unexpected ledger state on confirm"),
            }
            true
        }
        Err(e) => {
            ctx.ledger.mark_rejected(&request.external_id);
            warn!(
                external_id = %request.external_id,
                line_id = %request.line_id,
                odds = request.odds,
                status = ?e.status(),
                body = e.body().unwrap_or_default(),
                error = %e,
                "Failed to place wager"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Cancel passes
// ---------------------------------------------------------------------------

/// Cancel a policy-selected subset of the open wagers.
pub async fn cancel_wagers(ctx: &TradingContext, shutdown: &ShutdownListener) -> CancelPassReport {
    let mut report = CancelPassReport::default();

    for external_id in ctx.ledger.snapshot_keys() {
        if shutdown.is_triggered() {
            debug!("Shutdown requested, ending cancel pass early");
            break;
        }
        let Some(wager) = ctx.ledger.get(&external_id) else {
            continue;
        };
        if wager.status != WagerStatus::Placed || !ctx.policy.cancel_wager(&wager) {
            continue;
        }

        record(&mut report, external_id.clone(), cancel_one(ctx, &external_id).await);
    }

    if report.attempted() > 0 {
        info!(
            cancelled = report.cancelled.len(),
            already_gone = report.already_gone.len(),
            failed = report.failed.len(),
            open = ctx.ledger.len(),
            "Cancel pass complete"
        );
    }
    report
}

/// Cancel every wager still in the ledger. Used once at shutdown; each
/// wager gets a single best-effort attempt.
pub async fn cancel_all_outstanding(ctx: &TradingContext) -> CancelPassReport {
    let mut report = CancelPassReport::default();
    let wagers = ctx.ledger.snapshot();
    info!(outstanding = wagers.len(), "Cancelling all outstanding wagers");

    for wager in wagers {
        if wager.status == WagerStatus::Pending {
            warn!(external_id = %wager.external_id, "Dropping wager that never got a server id");
            ctx.ledger.mark_rejected(&wager.external_id);
            report.abandoned.push(wager.external_id);
            continue;
        }
        let outcome = cancel_one(ctx, &wager.external_id).await;
        record(&mut report, wager.external_id, outcome);
    }

    info!(
        cancelled = report.cancelled.len(),
        already_gone = report.already_gone.len(),
        failed = report.failed.len(),
        abandoned = report.abandoned.len(),
        "Cancel-all complete"
    );
    report
}

/// Cancel one wager through the ledger's request/confirm protocol.
pub async fn cancel_one(ctx: &TradingContext, external_id: &str) -> CancelOutcome {
    let wager_id = match ctx.ledger.request_cancel(external_id) {
        Ok(id) => id,
        Err(LedgerError::NotFound(_)) => return CancelOutcome::AlreadyGone,
        Err(e) => {
            debug!(error = %e, "Skipping cancel");
            return CancelOutcome::Skipped;
        }
    };

    let header = match ctx.auth.current_auth_header() {
        Ok(h) => h,
        Err(e) => {
            warn!(external_id, error = %e, "No session, cancel deferred");
            ctx.ledger.cancel_failed(external_id);
            return CancelOutcome::Failed;
        }
    };

    let request = CancelWagerRequest {
        external_id: external_id.to_string(),
        wager_id,
    };

    match ctx.api.cancel_wager(&header, &request).await {
        Ok(()) => {
            ctx.ledger.confirm_cancelled(external_id);
            info!(external_id, wager_id = %request.wager_id, "Wager cancelled");
            CancelOutcome::Cancelled
        }
        Err(e) if e.is_not_found() => {
            ctx.ledger.confirm_cancelled(external_id);
            info!(external_id, wager_id = %request.wager_id, "Wager already cancelled");
            CancelOutcome::AlreadyGone
        }
        Err(e) => {
            ctx.ledger.cancel_failed(external_id);
            warn!(
                external_id,
                wager_id = %request.wager_id,
                status = ?e.status(),
                body = e.body().unwrap_or_default(),
                error = %e,
                "Failed to cancel wager"
            );
            CancelOutcome::Failed
        }
    }
}

fn record(report: &mut CancelPassReport, external_id: String, outcome: CancelOutcome) {
    match outcome {
        CancelOutcome::Cancelled => report.cancelled.push(external_id),
        CancelOutcome::AlreadyGone => report.already_gone.push(external_id),
        CancelOutcome::Failed => report.failed.push(external_id),
        CancelOutcome::Skipped => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
