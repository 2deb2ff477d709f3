//! Wager selection policy.
//!
//! The bet and cancel jobs ask a `WagerPolicy` whether to act on each
//! market, selection and open wager, and at what odds. `RandomPolicy` is
//! the default probabilistic gate; tests substitute deterministic ones.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Market, Selection, SportEvent, Wager};

/// American odds the exchange accepts; the sign is drawn separately.
pub const DEFAULT_ALLOWED_ODDS: &[i32] = &[
    101, 102, 103, 104, 105, 110, 115, 120, 125, 130, 135, 140, 145, 150, 160, 170, 180, 190,
    200, 210, 220, 240, 250, 260, 280, 300, 320, 350, 400, 450, 500,
];

pub trait WagerPolicy: Send + Sync {
    /// Whether to consider a market at all this pass.
    fn act_on_market(&self, event: &SportEvent, market: &Market) -> bool;

    /// Whether to place a wager on one selection of a market we act on.
    fn bet_on_selection(&self, market: &Market, selection: &Selection) -> bool;

    /// Odds for a wager on `selection`.
    fn choose_odds(&self, selection: &Selection) -> i32;

    /// Whether to cancel an open wager this pass.
    fn cancel_wager(&self, wager: &Wager) -> bool;
}

/// Gates every decision on an independent coin flip.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    market_probability: f64,
    selection_probability: f64,
    cancel_probability: f64,
    allowed_odds: Vec<i32>,
}

impl RandomPolicy {
    pub fn new(
        market_probability: f64,
        selection_probability: f64,
        cancel_probability: f64,
        allowed_odds: Vec<i32>,
    ) -> Self {
        let allowed_odds = if allowed_odds.is_empty() {
            DEFAULT_ALLOWED_ODDS.to_vec()
        } else {
            allowed_odds
        };
        Self {
            market_probability: unit(market_probability),
            selection_probability: unit(selection_probability),
            cancel_probability: unit(cancel_probability),
            allowed_odds,
        }
    }

    pub fn allowed_odds(&self) -> &[i32] {
        &self.allowed_odds
    }
}

/// Clamp into [0, 1]; NaN becomes 0 so `gen_bool` never panics.
fn unit(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new(0.3, 0.3, 0.5, DEFAULT_ALLOWED_ODDS.to_vec())
    }
}

impl WagerPolicy for RandomPolicy {
    fn act_on_market(&self, _event: &SportEvent, _market: &Market) -> bool {
        rand::thread_rng().gen_bool(self.market_probability)
    }

    fn bet_on_selection(&self, _market: &Market, _selection: &Selection) -> bool {
        rand::thread_rng().gen_bool(self.selection_probability)
    }

    fn choose_odds(&self, _selection: &Selection) -> i32 {
        let mut rng = rand::thread_rng();
        let odds = self.allowed_odds.choose(&mut rng).copied().unwrap_or(100);
        if rng.gen_bool(0.5) {
            odds
        } else {
            -odds
        }
    }

    fn cancel_wager(&self, _wager: &Wager) -> bool {
        rand::thread_rng().gen_bool(self.cancel_probability)
    }
}
