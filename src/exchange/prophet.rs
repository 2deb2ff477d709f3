//! Prophet exchange partner API client.
//!
//! REST over HTTPS with a `{"data": ...}` response envelope.
//!
//! Auth: `POST partner/auth/login` with `{access_key, secret_key}` returns an
//! access token (and optionally a refresh token). Every other call sends
//! `Authorization: Bearer <token>` and `PartnerId: <partner id>`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ApiError, ExchangeApi};
use crate::types::{
    string_or_number, AuthHeader, CancelWagerRequest, Credentials, Market, PlaceWagerRequest,
    SessionTokens, SportEvent, Tournament,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const SANDBOX_BASE_URL: &str = "https://api-ss-sandbox.betprophet.co";

const LOGIN: &str = "partner/auth/login";
const REFRESH: &str = "partner/auth/refresh";
const PUSHER_AUTH: &str = "partner/mm/pusher";
const TOURNAMENTS: &str = "partner/mm/get_tournaments";
const SPORT_EVENTS: &str = "partner/mm/get_sport_events";
const MARKETS: &str = "partner/mm/get_markets";
const BALANCE: &str = "partner/mm/get_balance";
const PLACE_WAGER: &str = "partner/mm/place_wager";
const CANCEL_WAGER: &str = "partner/mm/cancel_wager";
const CANCEL_ALL_WAGERS: &str = "partner/mm/cancel_all_wagers";

/// Subscriptions announced when authorizing push channels.
const HEADER_SUBSCRIPTIONS: &str = r#"[{"type":"tournament","ids":[]}]"#;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TournamentsData {
    #[serde(default)]
    tournaments: Vec<Tournament>,
}

#[derive(Debug, Deserialize)]
struct SportEventsData {
    #[serde(default)]
    sport_events: Vec<SportEvent>,
}

#[derive(Debug, Deserialize)]
struct MarketsData {
    #[serde(default)]
    markets: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(default)]
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct PlaceWagerData {
    wager: WagerRef,
}

#[derive(Debug, Deserialize)]
struct WagerRef {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelAuth {
    auth: String,
}

impl From<SessionData> for SessionTokens {
    fn from(data: SessionData) -> Self {
        Self {
            access_token: SecretString::new(data.access_token),
            refresh_token: data.refresh_token.map(SecretString::new),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the Prophet partner API.
pub struct ProphetClient {
    http: Client,
    base_url: String,
}

impl ProphetClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(concat!("prophet-mm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport {
                endpoint: "client",
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    fn authed(&self, builder: RequestBuilder, auth: &AuthHeader) -> RequestBuilder {
        builder
            .header("Authorization", auth.authorization())
            .header("PartnerId", auth.partner_id())
    }

    /// Send a request, mapping transport failures and non-success statuses.
    async fn send(endpoint: &'static str, builder: RequestBuilder) -> Result<Response, ApiError> {
        debug!(endpoint, "Prophet API request");

        let resp = builder.send().await.map_err(|e| ApiError::Transport {
            endpoint,
            message: e.to_string(),
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint,
                status,
                body,
            });
        }

        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(
        endpoint: &'static str,
        resp: Response,
    ) -> Result<T, ApiError> {
        let envelope: Envelope<T> = resp.json().await.map_err(|e| ApiError::Decode {
            endpoint,
            message: e.to_string(),
        })?;
        Ok(envelope.data)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        auth: &AuthHeader,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let builder = self.authed(self.http.get(self.url(endpoint)), auth).query(query);
        let resp = Self::send(endpoint, builder).await?;
        Self::decode(endpoint, resp).await
    }
}

#[async_trait]
impl ExchangeApi for ProphetClient {
    async fn login(&self, credentials: &Credentials) -> Result<SessionTokens, ApiError> {
        let body = serde_json::json!({
            "access_key": credentials.access_key,
            "secret_key": credentials.secret_key.expose_secret(),
        });
        let resp = Self::send(LOGIN, self.http.post(self.url(LOGIN)).json(&body)).await?;
        let data: SessionData = Self::decode(LOGIN, resp).await?;
        Ok(data.into())
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<SessionTokens, ApiError> {
        let body = serde_json::json!({ "refresh_token": refresh_token.expose_secret() });
        let resp = Self::send(REFRESH, self.http.post(self.url(REFRESH)).json(&body)).await?;
        let data: SessionData = Self::decode(REFRESH, resp).await?;
        Ok(data.into())
    }

    async fn get_tournaments(&self, auth: &AuthHeader) -> Result<Vec<Tournament>, ApiError> {
        let data: TournamentsData = self.get_data(TOURNAMENTS, auth, &[]).await?;
        Ok(data.tournaments)
    }

    async fn get_sport_events(
        &self,
        auth: &AuthHeader,
        tournament_id: i64,
    ) -> Result<Vec<SportEvent>, ApiError> {
        let query = [("tournament_id", tournament_id.to_string())];
        let data: SportEventsData = self.get_data(SPORT_EVENTS, auth, &query).await?;
        Ok(data.sport_events)
    }

    async fn get_markets(
        &self,
        auth: &AuthHeader,
        event_id: i64,
    ) -> Result<Vec<Market>, ApiError> {
        let query = [("event_id", event_id.to_string())];
        let data: MarketsData = self.get_data(MARKETS, auth, &query).await?;
        Ok(data.markets)
    }

    async fn get_balance(&self, auth: &AuthHeader) -> Result<Decimal, ApiError> {
        let data: BalanceData = self.get_data(BALANCE, auth, &[]).await?;
        Ok(data.balance)
    }

    async fn place_wager(
        &self,
        auth: &AuthHeader,
        request: &PlaceWagerRequest,
    ) -> Result<String, ApiError> {
        let builder = self.authed(self.http.post(self.url(PLACE_WAGER)), auth).json(request);
        let resp = Self::send(PLACE_WAGER, builder).await?;
        let data: PlaceWagerData = Self::decode(PLACE_WAGER, resp).await?;
        Ok(data.wager.id)
    }

    async fn cancel_wager(
        &self,
        auth: &AuthHeader,
        request: &CancelWagerRequest,
    ) -> Result<(), ApiError> {
        let builder = self.authed(self.http.post(self.url(CANCEL_WAGER)), auth).json(request);
        Self::send(CANCEL_WAGER, builder).await?;
        Ok(())
    }

    async fn cancel_all_wagers(&self, auth: &AuthHeader) -> Result<(), ApiError> {
        let builder = self
            .authed(self.http.post(self.url(CANCEL_ALL_WAGERS)), auth)
            .json(&serde_json::json!({}));
        Self::send(CANCEL_ALL_WAGERS, builder).await?;
        Ok(())
    }

    async fn authorize_channel(
        &self,
        auth: &AuthHeader,
        socket_id: &str,
        channel_name: &str,
    ) -> Result<String, ApiError> {
        let builder = self
            .authed(self.http.post(self.url(PUSHER_AUTH)), auth)
            .header("header-subscriptions", HEADER_SUBSCRIPTIONS)
            .form(&[("socket_id", socket_id), ("channel_name", channel_name)]);
        let resp = Self::send(PUSHER_AUTH, builder).await?;

        // Pusher auth responses are usually bare; tolerate the envelope too.
        let value: serde_json::Value = resp.json().await.map_err(|e| ApiError::Decode {
            endpoint: PUSHER_AUTH,
            message: e.to_string(),
        })?;
        let inner = value.get("data").cloned().unwrap_or(value);
        let auth: ChannelAuth = serde_json::from_value(inner).map_err(|e| ApiError::Decode {
            endpoint: PUSHER_AUTH,
            message: e.to_string(),
        })?;
        Ok(auth.auth)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
