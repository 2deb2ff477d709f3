//! Exchange integration.
//!
//! Defines the `ExchangeApi` trait, the request/response boundary the
//! session core depends on, and the `ApiError` every call reports.
//! `prophet` provides the HTTP implementation.

pub mod prophet;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::types::{
    AuthHeader, CancelWagerRequest, Credentials, Market, PlaceWagerRequest, SessionTokens,
    SportEvent, Tournament,
};

/// Failure of a single exchange call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    #[error("failed to decode {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

impl ApiError {
    /// HTTP status of a non-success response, if the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body of a non-success response.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Abstraction over the exchange's partner API.
///
/// Every authenticated call takes the header snapshot the caller obtained
/// from `AuthSession` at call time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Exchange credentials for a fresh session.
    async fn login(&self, credentials: &Credentials) -> Result<SessionTokens, ApiError>;

    /// Extend a session using its refresh token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<SessionTokens, ApiError>;

    async fn get_tournaments(&self, auth: &AuthHeader) -> Result<Vec<Tournament>, ApiError>;

    async fn get_sport_events(
        &self,
        auth: &AuthHeader,
        tournament_id: i64,
    ) -> Result<Vec<SportEvent>, ApiError>;

    async fn get_markets(&self, auth: &AuthHeader, event_id: i64)
        -> Result<Vec<Market>, ApiError>;

    async fn get_balance(&self, auth: &AuthHeader) -> Result<Decimal, ApiError>;

    /// Place a wager. Returns the server-assigned wager id.
    async fn place_wager(
        &self,
        auth: &AuthHeader,
        request: &PlaceWagerRequest,
    ) -> Result<String, ApiError>;

    /// Cancel one wager. A 404 means the exchange no longer has it open.
    async fn cancel_wager(
        &self,
        auth: &AuthHeader,
        request: &CancelWagerRequest,
    ) -> Result<(), ApiError>;

    /// Best-effort bulk cancel of every open wager on the account.
    async fn cancel_all_wagers(&self, auth: &AuthHeader) -> Result<(), ApiError>;

    /// Obtain the push-service signature for a private channel subscription.
    async fn authorize_channel(
        &self,
        auth: &AuthHeader,
        socket_id: &str,
        channel_name: &str,
    ) -> Result<String, ApiError>;
}
