//! Session authentication.
//!
//! `AuthSession` owns the partner credentials, exchanges them for a bearer
//! token and keeps the latest session behind a lock that is only ever
//! swapped whole. Callers take a header snapshot per outbound call, so
//! every request uses the most recently issued token at call time.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use secrecy::ExposeSecret;

use crate::exchange::{ApiError, ExchangeApi};
use crate::types::{AuthHeader, Credentials, Session};

/// Lifetime assumed for an access token when the exchange does not say
/// otherwise.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication request failed: {0}")]
    Api(ApiError),

    #[error("no active session; login has not succeeded yet")]
    NoSession,
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body, .. } => Self::Rejected { status, body },
            other => Self::Api(other),
        }
    }
}

pub struct AuthSession {
    api: Arc<dyn ExchangeApi>,
    credentials: Credentials,
    partner_id: String,
    session_ttl: chrono::Duration,
    current: RwLock<Option<Arc<Session>>>,
}

impl AuthSession {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        credentials: Credentials,
        partner_id: String,
        session_ttl: Option<chrono::Duration>,
    ) -> Self {
        Self {
            api,
            credentials,
            partner_id,
            session_ttl: session_ttl
                .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS)),
            current: RwLock::new(None),
        }
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    /// Exchange the stored credentials for a new session.
    pub async fn login(&self) -> Result<Arc<Session>, AuthError> {
        info!(access_key = %self.credentials.access_key, "Logging in to exchange");
        let tokens = self.api.login(&self.credentials).await?;
        let session = self.install(Session::from_tokens(tokens, self.session_ttl));
        info!(expires_at = %session.expires_at, "Session started");
        Ok(session)
    }

    /// Extend the current session.
    ///
    /// Uses the refresh endpoint when the last session carried a refresh
    /// token; otherwise logs in again with the stored credentials.
    pub async fn refresh(&self) -> Result<Arc<Session>, AuthError> {
        let current = self.session();
        let refresh_token = current.as_ref().and_then(|s| s.refresh_token.as_ref());

        let Some(refresh_token) = refresh_token else {
            debug!("No refresh token on current session, re-authenticating");
            return self.login().await;
        };

        match self.api.refresh(refresh_token).await {
            Ok(tokens) => {
                let session = self.install(Session::from_tokens(tokens, self.session_ttl));
                info!(expires_at = %session.expires_at, "Session refreshed");
                Ok(session)
            }
            Err(e) if matches!(e.status(), Some(401) | Some(403)) => {
                warn!(error = %e, "Refresh token rejected, re-authenticating");
                self.login().await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of the latest session, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Header bundle built from the latest successful session.
    pub fn current_auth_header(&self) -> Result<AuthHeader, AuthError> {
        let guard = self.current.read();
        let session = guard.as_ref().ok_or(AuthError::NoSession)?;
        Ok(AuthHeader::new(
            session.access_token.expose_secret(),
            &self.partner_id,
        ))
    }

    fn install(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        *self.current.write() = Some(Arc::clone(&session));
        session
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
