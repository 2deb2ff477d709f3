//! Shared types for the market-making session.
//!
//! These types form the data model used by the auth, cache, ledger,
//! realtime and scheduler modules. Wire shapes that the exchange sends
//! back are deserialized directly into them where the mapping is 1:1.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Credentials & session
// ---------------------------------------------------------------------------

/// Partner API credentials exchanged for a bearer token at login.
#[derive(Debug)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: SecretString,
}

/// Raw tokens returned by the login/refresh endpoints.
#[derive(Debug)]
pub struct SessionTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

/// An authenticated session. Replaced wholesale on every login/refresh and
/// handed to callers behind an `Arc`, so a reader never sees a half-updated
/// token.
#[derive(Debug)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn from_tokens(tokens: SessionTokens, ttl: chrono::Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn time_remaining(&self) -> chrono::Duration {
        self.expires_at - Utc::now()
    }
}

/// Header bundle attached to every authenticated call:
/// `Authorization: Bearer <token>` plus the partner identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeader {
    authorization: String,
    partner_id: String,
}

impl AuthHeader {
    pub fn new(access_token: &str, partner_id: &str) -> Self {
        Self {
            authorization: format!("Bearer {access_token}"),
            partner_id: partner_id.to_string(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    /// Value for the `PartnerId` header.
    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeader")
            .field("authorization", &"Bearer [REDACTED]")
            .field("partner_id", &self.partner_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Market universe
// ---------------------------------------------------------------------------

/// Tournament as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: i64,
    pub name: String,
}

/// A single side of a market that can be wagered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    pub line_id: String,
}

/// Market type the betting job acts on.
pub const MONEYLINE: &str = "moneyline";

/// A wagering market on a sport event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    #[serde(rename = "type")]
    pub market_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// The exchange nests each side as a list of lines; the first line of
    /// each side is the one we trade.
    #[serde(default, deserialize_with = "first_line_per_side")]
    pub selections: Vec<Selection>,
}

impl Market {
    pub fn is_moneyline(&self) -> bool {
        self.market_type.eq_ignore_ascii_case(MONEYLINE)
    }
}

/// A sport event and its markets. The cache hands these out behind an
/// `Arc` and swaps the whole value on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SportEvent {
    pub event_id: i64,
    pub name: String,
    #[serde(default)]
    pub tournament_id: Option<i64>,
    #[serde(default)]
    pub markets: Vec<Market>,
}

impl SportEvent {
    pub fn moneyline_markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.iter().filter(|m| m.is_moneyline())
    }
}

/// Outcome of a seeding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub tournaments_found: usize,
    pub events_ingested: usize,
    pub tournaments_skipped: usize,
    pub events_skipped: usize,
}

impl fmt::Display for SeedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {} tournaments, ingested {} sport events (skipped {} tournaments, {} events)",
            self.tournaments_found,
            self.events_ingested,
            self.tournaments_skipped,
            self.events_skipped,
        )
    }
}

// ---------------------------------------------------------------------------
// Wagers
// ---------------------------------------------------------------------------

/// Lifecycle state of a wager we issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Placed,
    CancelRequested,
    Cancelled,
    Rejected,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Placed => "placed",
            Self::CancelRequested => "cancel_requested",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// A ledger record for one placement, keyed by its client-generated
/// `external_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wager {
    pub external_id: String,
    pub wager_id: Option<String>,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
}

/// Body of the place-wager call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceWagerRequest {
    pub external_id: String,
    pub line_id: String,
    pub odds: i32,
    pub stake: Decimal,
}

/// Body of the cancel-wager call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelWagerRequest {
    pub external_id: String,
    pub wager_id: String,
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Accept an identifier the exchange may encode either as a JSON string or
/// a JSON number.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    })
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
}

fn first_line_per_side<'de, D>(deserializer: D) -> Result<Vec<Selection>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Side {
        Lines(Vec<Selection>),
        Single(Selection),
    }

    let sides = Vec::<Side>::deserialize(deserializer)?;
    Ok(sides
        .into_iter()
        .filter_map(|side| match side {
            Side::Lines(lines) => lines.into_iter().next(),
            Side::Single(sel) => Some(sel),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
