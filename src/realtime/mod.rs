//! Realtime push handling.
//!
//! The subscriber (`pusher`) owns the transport. It decodes each inbound
//! event into a typed `PushMessage` and forwards it over a channel; a
//! single consumer task applies those messages to the cache and ledger, so
//! no state is mutated from the transport's receive loop.

pub mod pusher;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::cache::MarketCache;
use crate::engine::ledger::{Reconciled, WagerLedger};
use crate::engine::shutdown::ShutdownListener;
use crate::types::{opt_string_or_number, Market};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// New market list for one sport event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketUpdate {
    #[serde(alias = "sport_event_id")]
    pub event_id: i64,
    #[serde(default)]
    pub markets: Vec<Market>,
}

/// Status change for one of our wagers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WagerUpdate {
    pub external_id: String,
    #[serde(default, alias = "id", deserialize_with = "opt_string_or_number")]
    pub wager_id: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WagerUpdateKind {
    /// Live on the exchange.
    Open,
    /// No longer live: cancelled, settled, rejected or expired.
    Closed,
    Other,
}

impl WagerUpdate {
    pub fn kind(&self) -> WagerUpdateKind {
        match self.status.to_ascii_lowercase().as_str() {
            "open" | "placed" | "active" | "matched" | "partially_matched" | "unmatched" => {
                WagerUpdateKind::Open
            }
            "cancelled" | "canceled" | "closed" | "settled" | "rejected" | "expired"
            | "void" | "voided" | "invalid" => WagerUpdateKind::Closed,
            _ => WagerUpdateKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Market(MarketUpdate),
    Wager(WagerUpdate),
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("malformed push payload on '{event}': {reason}")]
    Malformed { event: String, reason: String },
}

impl PushError {
    fn malformed(event: &str, reason: impl ToString) -> Self {
        Self::Malformed {
            event: event.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse the `data` field of a push event. The push service double-encodes
/// it as a JSON string; plain objects are accepted too.
fn event_body(event: &str, data: &Value) -> Result<Value, PushError> {
    match data {
        Value::String(s) => serde_json::from_str(s).map_err(|e| PushError::malformed(event, e)),
        Value::Object(_) | Value::Array(_) => Ok(data.clone()),
        other => Err(PushError::malformed(event, format!("unexpected data {other}"))),
    }
}

/// Unwrap a base64 `payload` field when present.
fn unwrap_payload(event: &str, body: Value) -> Result<Value, PushError> {
    if body.get("payload").is_none() {
        return Ok(body);
    }
    let encoded = body["payload"]
        .as_str()
        .ok_or_else(|| PushError::malformed(event, "payload is not a string"))?;
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| PushError::malformed(event, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PushError::malformed(event, e))
}

/// Decode a public tournament event into a market update.
pub fn decode_market_event(event: &str, data: &Value) -> Result<MarketUpdate, PushError> {
    let body = unwrap_payload(event, event_body(event, data)?)?;
    let nested = body.get("sport_event").cloned();
    let body = nested.unwrap_or(body);
    serde_json::from_value(body).map_err(|e| PushError::malformed(event, e))
}

/// Decode a private `wagers` event. A single event may carry one wager or
/// a batch. Malformed items are logged and skipped; the rest still apply.
pub fn decode_wager_event(event: &str, data: &Value) -> Result<Vec<WagerUpdate>, PushError> {
    let body = unwrap_payload(event, event_body(event, data)?)?;
    let batch = body.get("wagers").and_then(Value::as_array).cloned();
    let items = match (batch, body) {
        (Some(items), _) => items,
        (None, Value::Array(items)) => items,
        (None, body @ Value::Object(_)) => vec![body],
        (None, other) => {
            return Err(PushError::malformed(event, format!("unexpected body {other}")))
        }
    };

    let updates = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WagerUpdate>(item) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %PushError::malformed(event, e), "Skipping malformed wager item");
                None
            }
        })
        .collect();
    Ok(updates)
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Apply one message to shared state.
pub fn apply(message: PushMessage, cache: &MarketCache, ledger: &WagerLedger) {
    match message {
        PushMessage::Market(update) => {
            let event_id = update.event_id;
            let markets = update.markets.len();
            if cache.apply_realtime_update(update) {
                debug!(event_id, markets, "Applied market update");
            }
        }
        PushMessage::Wager(update) => match ledger.reconcile(&update) {
            Reconciled::Confirmed => info!(
                external_id = %update.external_id,
                wager_id = ?update.wager_id,
                "Wager confirmed by push"
            ),
            Reconciled::Removed => info!(
                external_id = %update.external_id,
                status = %update.status,
                "Wager closed by push"
            ),
            Reconciled::Unchanged => debug!(
                external_id = %update.external_id,
                status = %update.status,
                "Wager push left ledger unchanged"
            ),
        },
    }
}

/// Drain push messages until shutdown or until every sender is gone.
pub async fn run_consumer(
    mut rx: mpsc::Receiver<PushMessage>,
    cache: Arc<MarketCache>,
    ledger: Arc<WagerLedger>,
    mut shutdown: ShutdownListener,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                // Apply anything already queued before stopping.
                let mut drained = 0usize;
                while let Ok(msg) = rx.try_recv() {
                    apply(msg, &cache, &ledger);
                    drained += 1;
                }
                debug!(drained, "Push consumer drained queue on shutdown");
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => apply(msg, &cache, &ledger),
                None => {
                    debug!("Push channel closed");
                    break;
                }
            },
        }
    }
    debug!("Push consumer stopped");
}

/// Forward a decode result, logging and dropping malformed payloads.
pub(crate) async fn forward(
    tx: &mpsc::Sender<PushMessage>,
    decoded: Result<Vec<PushMessage>, PushError>,
) -> bool {
    match decoded {
        Ok(messages) => {
            for msg in messages {
                if tx.send(msg).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => {
            warn!(error = %e, "Dropping push payload");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
