//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (partner keys and id) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::orchestrator::{MarketMakerSettings, DEFAULT_PUSH_CHANNEL_CAPACITY};
use crate::engine::scheduler::{
    ScheduleSettings, DEFAULT_BET_INTERVAL, DEFAULT_CANCEL_INTERVAL, DEFAULT_MAX_RENEW_FAILURES,
    DEFAULT_RENEW_INTERVAL,
};
use crate::exchange::prophet::SANDBOX_BASE_URL;
use crate::realtime::pusher::{PusherSettings, DEFAULT_CONNECT_TIMEOUT};
use crate::strategy::{RandomPolicy, DEFAULT_ALLOWED_ODDS};
use crate::types::Credentials;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub realtime: RealtimeConfig,
    pub market_making: MarketMakingConfig,
    pub schedule: ScheduleConfig,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub session_ttl_secs: i64,
    pub access_key_env: String,
    pub secret_key_env: String,
    pub partner_id_env: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: SANDBOX_BASE_URL.to_string(),
            request_timeout_secs: 30,
            session_ttl_secs: crate::auth::DEFAULT_SESSION_TTL_SECS,
            access_key_env: "PROPHET_ACCESS_KEY".into(),
            secret_key_env: "PROPHET_SECRET_KEY".into(),
            partner_id_env: "PROPHET_PARTNER_ID".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub app_key: String,
    pub cluster: String,
    pub ws_url: Option<String>,
    pub connect_timeout_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_key: String::new(),
            cluster: "mt1".into(),
            ws_url: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
            channel_capacity: DEFAULT_PUSH_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketMakingConfig {
    /// Tournament names, matched exactly against the exchange listing.
    pub tournaments: Vec<String>,
    pub stake: Decimal,
}

impl Default for MarketMakingConfig {
    fn default() -> Self {
        Self {
            tournaments: Vec::new(),
            stake: Decimal::ONE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub bet_interval_secs: u64,
    pub cancel_interval_secs: u64,
    pub renew_interval_secs: u64,
    pub max_renew_failures: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            bet_interval_secs: DEFAULT_BET_INTERVAL.as_secs(),
            cancel_interval_secs: DEFAULT_CANCEL_INTERVAL.as_secs(),
            renew_interval_secs: DEFAULT_RENEW_INTERVAL.as_secs(),
            max_renew_failures: DEFAULT_MAX_RENEW_FAILURES,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub market_probability: f64,
    pub selection_probability: f64,
    pub cancel_probability: f64,
    pub allowed_odds: Vec<i32>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            market_probability: 0.3,
            selection_probability: 0.3,
            cancel_probability: 0.5,
            allowed_odds: DEFAULT_ALLOWED_ODDS.to_vec(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn validate(&self) -> Result<()> {
        if self.market_making.tournaments.is_empty() {
            bail!("market_making.tournaments must name at least one tournament");
        }
        if self.market_making.stake <= Decimal::ZERO {
            bail!("market_making.stake must be positive");
        }
        if self.realtime.enabled && self.realtime.app_key.is_empty() && self.realtime.ws_url.is_none() {
            bail!("realtime.app_key is required when realtime is enabled");
        }
        if self.realtime.enabled && self.realtime.connect_timeout_secs == 0 {
            bail!("realtime.connect_timeout_secs must be non-zero");
        }
        let s = &self.schedule;
        if s.bet_interval_secs == 0 || s.cancel_interval_secs == 0 || s.renew_interval_secs == 0 {
            bail!("schedule intervals must be non-zero");
        }
        let p = &self.strategy;
        for (name, value) in [
            ("market_probability", p.market_probability),
            ("selection_probability", p.selection_probability),
            ("cancel_probability", p.cancel_probability),
        ] {
            // Also rejects NaN, which TOML accepts.
            if !(0.0..=1.0).contains(&value) {
                bail!("strategy.{name} must be between 0 and 1, got {value}");
            }
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            access_key: Self::resolve_env(&self.exchange.access_key_env)?,
            secret_key: SecretString::new(Self::resolve_env(&self.exchange.secret_key_env)?),
        })
    }

    pub fn partner_id(&self) -> Result<String> {
        Self::resolve_env(&self.exchange.partner_id_env)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange.request_timeout_secs)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.exchange.session_ttl_secs)
    }

    pub fn policy(&self) -> RandomPolicy {
        let s = &self.strategy;
        RandomPolicy::new(
            s.market_probability,
            s.selection_probability,
            s.cancel_probability,
            s.allowed_odds.clone(),
        )
    }

    pub fn market_maker_settings(&self) -> MarketMakerSettings {
        let s = &self.schedule;
        let r = &self.realtime;
        MarketMakerSettings {
            tournaments: self.market_making.tournaments.clone(),
            stake: self.market_making.stake,
            schedule: ScheduleSettings {
                bet_interval: Duration::from_secs(s.bet_interval_secs),
                cancel_interval: Duration::from_secs(s.cancel_interval_secs),
                renew_interval: Duration::from_secs(s.renew_interval_secs),
                max_renew_failures: s.max_renew_failures,
            },
            realtime: r.enabled.then(|| PusherSettings {
                app_key: r.app_key.clone(),
                cluster: r.cluster.clone(),
                ws_url: r.ws_url.clone(),
                connect_timeout: Duration::from_secs(r.connect_timeout_secs),
                initial_backoff: Duration::from_secs(r.initial_backoff_secs),
                max_backoff: Duration::from_secs(r.max_backoff_secs),
            }),
            push_channel_capacity: r.channel_capacity,
        }
    }
}
