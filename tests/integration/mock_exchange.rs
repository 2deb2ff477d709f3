//! Mock exchange for integration testing.
//!
//! Provides a deterministic `ExchangeApi` implementation that serves a
//! fixed market universe, accepts or rejects wagers on demand, and records
//! every call, all in-memory with no external dependencies.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use prophet_mm::exchange::{ApiError, ExchangeApi};
use prophet_mm::types::*;

/// A mock exchange for deterministic testing.
///
/// The universe is fixed at construction; failure behaviour can be
/// changed from test code while a session is running.
#[derive(Default)]
pub struct MockExchange {
    tournaments: Vec<Tournament>,
    events: HashMap<i64, Vec<SportEvent>>,
    markets: HashMap<i64, Vec<Market>>,

    /// Successful logins allowed before every further login fails.
    login_budget: Mutex<Option<usize>>,
    /// Line ids whose placement is rejected.
    reject_lines: Mutex<HashSet<String>>,
    /// Status returned by cancel for a given wager id.
    cancel_status: Mutex<HashMap<String, u16>>,

    next_wager_id: AtomicUsize,
    pub logins: AtomicUsize,
    pub bulk_cancels: AtomicUsize,
    pub placed: Mutex<Vec<PlaceWagerRequest>>,
    pub cancelled: Mutex<Vec<CancelWagerRequest>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tournament with one event carrying `markets`.
    pub fn with_event(mut self, tournament: (i64, &str), event_id: i64, markets: Vec<Market>) -> Self {
        let (tournament_id, name) = tournament;
        if !self.tournaments.iter().any(|t| t.id == tournament_id) {
            self.tournaments.push(Tournament {
                id: tournament_id,
                name: name.to_string(),
            });
        }
        self.events.entry(tournament_id).or_default().push(SportEvent {
            event_id,
            name: format!("event {event_id}"),
            tournament_id: Some(tournament_id),
            markets: Vec::new(),
        });
        self.markets.insert(event_id, markets);
        self
    }

    pub fn allow_logins(&self, n: usize) {
        *self.login_budget.lock().unwrap() = Some(n);
    }

    pub fn reject_line(&self, line_id: &str) {
        self.reject_lines.lock().unwrap().insert(line_id.to_string());
    }

    pub fn cancel_responds(&self, wager_id: &str, status: u16) {
        self.cancel_status
            .lock()
            .unwrap()
            .insert(wager_id.to_string(), status);
    }

    pub fn placed(&self) -> Vec<PlaceWagerRequest> {
        self.placed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<CancelWagerRequest> {
        self.cancelled.lock().unwrap().clone()
    }
}

/// A moneyline market with one selection per line id.
pub fn moneyline(lines: &[&str]) -> Market {
    market("moneyline", lines)
}

pub fn market(market_type: &str, lines: &[&str]) -> Market {
    Market {
        market_type: market_type.to_string(),
        name: None,
        selections: lines
            .iter()
            .map(|l| Selection {
                name: format!("selection {l}"),
                line_id: l.to_string(),
            })
            .collect(),
    }
}

fn status(endpoint: &'static str, status: u16, body: &str) -> ApiError {
    ApiError::Status {
        endpoint,
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn login(&self, _credentials: &Credentials) -> Result<SessionTokens, ApiError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        if let Some(budget) = *self.login_budget.lock().unwrap() {
            if n >= budget {
                return Err(status("login", 401, "credentials revoked"));
            }
        }
        Ok(SessionTokens {
            access_token: SecretString::new(format!("token-{n}")),
            refresh_token: None,
        })
    }

    async fn refresh(&self, _refresh_token: &SecretString) -> Result<SessionTokens, ApiError> {
        Err(status("refresh", 404, "no refresh endpoint"))
    }

    async fn get_tournaments(&self, _auth: &AuthHeader) -> Result<Vec<Tournament>, ApiError> {
        Ok(self.tournaments.clone())
    }

    async fn get_sport_events(
        &self,
        _auth: &AuthHeader,
        tournament_id: i64,
    ) -> Result<Vec<SportEvent>, ApiError> {
        Ok(self.events.get(&tournament_id).cloned().unwrap_or_default())
    }

    async fn get_markets(&self, _auth: &AuthHeader, event_id: i64) -> Result<Vec<Market>, ApiError> {
        self.markets
            .get(&event_id)
            .cloned()
            .ok_or_else(|| status("get_markets", 404, "unknown event"))
    }

    async fn get_balance(&self, _auth: &AuthHeader) -> Result<Decimal, ApiError> {
        Ok(dec!(1000))
    }

    async fn place_wager(
        &self,
        _auth: &AuthHeader,
        request: &PlaceWagerRequest,
    ) -> Result<String, ApiError> {
        self.placed.lock().unwrap().push(request.clone());
        if self.reject_lines.lock().unwrap().contains(&request.line_id) {
            return Err(status("place_wager", 400, "line suspended"));
        }
        let id = self.next_wager_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(id.to_string())
    }

    async fn cancel_wager(
        &self,
        _auth: &AuthHeader,
        request: &CancelWagerRequest,
    ) -> Result<(), ApiError> {
        self.cancelled.lock().unwrap().push(request.clone());
        match self.cancel_status.lock().unwrap().get(&request.wager_id) {
            None | Some(200) => Ok(()),
            Some(&code) => Err(status("cancel_wager", code, "cancel refused")),
        }
    }

    async fn cancel_all_wagers(&self, _auth: &AuthHeader) -> Result<(), ApiError> {
        self.bulk_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn authorize_channel(
        &self,
        _auth: &AuthHeader,
        socket_id: &str,
        channel_name: &str,
    ) -> Result<String, ApiError> {
        Ok(format!("key:{socket_id}:{channel_name}"))
    }
}
