//! Core engine: shared trading state and the jobs that act on it.

pub mod actions;
pub mod cache;
pub mod ledger;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::auth::AuthSession;
use crate::exchange::ExchangeApi;
use crate::strategy::WagerPolicy;
use cache::MarketCache;
use ledger::WagerLedger;

/// Everything a job needs, constructed once at startup and shared by
/// reference count with every task.
#[derive(Clone)]
pub struct TradingContext {
    pub api: Arc<dyn ExchangeApi>,
    pub auth: Arc<AuthSession>,
    pub cache: Arc<MarketCache>,
    pub ledger: Arc<WagerLedger>,
    pub policy: Arc<dyn WagerPolicy>,
    pub stake: Decimal,
}
