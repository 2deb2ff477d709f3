//! RealtimeSubscriber over the Pusher websocket protocol.
//!
//! One connection carries two channels: the public broadcast channel, where
//! each tournament of interest has its own event, and the per-user private
//! channel carrying `wagers` events. Both channels are private in Pusher
//! terms and are authorized through the exchange before subscribing.
//!
//! On any transport failure the connection is rebuilt from scratch and every
//! channel is subscribed again; cache and ledger state live elsewhere and
//! survive the reconnect.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{decode_market_event, decode_wager_event, forward, PushError, PushMessage};
use crate::auth::{AuthError, AuthSession};
use crate::engine::shutdown::ShutdownListener;
use crate::exchange::{ApiError, ExchangeApi};

pub const PUBLIC_CHANNEL: &str = "private-broadcast-service=3-device_type=5";
pub const WAGERS_EVENT: &str = "wagers";

const PROTOCOL_VERSION: u8 = 7;
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PusherSettings {
    pub app_key: String,
    pub cluster: String,
    /// Full websocket URL; overrides the one derived from key and cluster.
    pub ws_url: Option<String>,
    /// Limit on the TCP connect plus websocket upgrade.
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl PusherSettings {
    pub fn endpoint(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => format!(
                "wss://ws-{}.pusher.com/app/{}?protocol={}&client=prophet-mm&version={}&flash=false",
                self.cluster,
                self.app_key,
                PROTOCOL_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel bindings
// ---------------------------------------------------------------------------

/// Where an inbound event should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tournament(i64),
    Wagers,
}

/// Channel names and bound events for one session.
#[derive(Debug, Clone)]
pub struct ChannelBindings {
    private_channel: String,
    tournaments: HashSet<i64>,
}

impl ChannelBindings {
    pub fn new(partner_id: &str, tournament_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            private_channel: format!(
                "private-service=3-device_type=5-user={}",
                partner_id.replace('-', "")
            ),
            tournaments: tournament_ids.into_iter().collect(),
        }
    }

    pub fn public_channel(&self) -> &str {
        PUBLIC_CHANNEL
    }

    pub fn private_channel(&self) -> &str {
        &self.private_channel
    }

    pub fn channels(&self) -> [&str; 2] {
        [PUBLIC_CHANNEL, &self.private_channel]
    }

    pub fn tournament_event(tournament_id: i64) -> String {
        format!("tournaments_{tournament_id}")
    }

    /// Resolve a bound (channel, event) pair. Unbound pairs yield `None`.
    pub fn route(&self, channel: &str, event: &str) -> Option<Route> {
        if channel == PUBLIC_CHANNEL {
            let id = event.strip_prefix("tournaments_")?.parse().ok()?;
            self.tournaments.contains(&id).then_some(Route::Tournament(id))
        } else if channel == self.private_channel && event == WAGERS_EVENT {
            Some(Route::Wagers)
        } else {
            None
        }
    }

    pub fn tournament_count(&self) -> usize {
        self.tournaments.len()
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential reconnect delay, doubled per failure and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ---------------------------------------------------------------------------
// Protocol frames
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ConnectionEstablished {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

/// Pusher sends `data` as a JSON-encoded string on protocol events.
fn frame_data<T: DeserializeOwned>(data: &Value) -> Result<T, serde_json::Error> {
    match data {
        Value::String(s) => serde_json::from_str(s),
        other => T::deserialize(other),
    }
}

fn subscribe_frame(channel: &str, auth: &str) -> Message {
    let frame = json!({
        "event": "pusher:subscribe",
        "data": { "channel": channel, "auth": auth },
    });
    Message::Text(frame.to_string())
}

fn ping_frame() -> Message {
    Message::Text(json!({ "event": "pusher:ping", "data": {} }).to_string())
}

fn pong_frame() -> Message {
    Message::Text(json!({ "event": "pusher:pong", "data": {} }).to_string())
}

/// Decode an application event into push messages, or `None` when the
/// event is not one we bound.
fn dispatch(
    bindings: &ChannelBindings,
    channel: &str,
    event: &str,
    data: &Value,
) -> Option<Result<Vec<PushMessage>, PushError>> {
    let decoded = match bindings.route(channel, event)? {
        Route::Tournament(_) => {
            decode_market_event(event, data).map(|update| vec![PushMessage::Market(update)])
        }
        Route::Wagers => decode_wager_event(event, data)
            .map(|updates| updates.into_iter().map(PushMessage::Wager).collect()),
    };
    Some(decoded)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PusherError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("authorization for channel '{channel}' failed: {source}")]
    ChannelAuth {
        channel: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    /// The consumer has gone away; nothing left to deliver to.
    Stop,
}

pub struct PusherSubscriber {
    api: Arc<dyn ExchangeApi>,
    auth: Arc<AuthSession>,
    settings: PusherSettings,
    bindings: ChannelBindings,
    tx: mpsc::Sender<PushMessage>,
}

impl PusherSubscriber {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        auth: Arc<AuthSession>,
        settings: PusherSettings,
        bindings: ChannelBindings,
        tx: mpsc::Sender<PushMessage>,
    ) -> Self {
        Self {
            api,
            auth,
            settings,
            bindings,
            tx,
        }
    }

    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connect, and reconnect with backoff, until shutdown.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let mut backoff = Backoff::new(self.settings.initial_backoff, self.settings.max_backoff);
        let url = self.settings.endpoint();

        while !shutdown.is_triggered() {
            info!(
                tournaments = self.bindings.tournament_count(),
                "Connecting to push service"
            );
            match self.connect_and_run(&url, &mut backoff, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Push connection lost, reconnecting");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("Push subscriber stopped");
    }

    async fn connect_and_run(
        &self,
        url: &str,
        backoff: &mut Backoff,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), PusherError> {
        let limit = self.settings.connect_timeout;
        let connected = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            connected = tokio::time::timeout(limit, connect_async(url)) => connected,
        };
        let (ws, _response) = connected
            .map_err(|_| {
                PusherError::Connect(format!("handshake timed out after {}ms", limit.as_millis()))
            })?
            .map_err(|e| PusherError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws.split();
        let mut activity_timeout = DEFAULT_ACTIVITY_TIMEOUT;
        let mut awaiting_pong = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    let _ = write.close().await;
                    return Ok(());
                }
                next = tokio::time::timeout(activity_timeout, read.next()) => next,
            };

            let msg = match next {
                Err(_) if awaiting_pong => {
                    return Err(PusherError::Closed("no reply to keep-alive ping".into()));
                }
                Err(_) => {
                    debug!("Connection idle, sending ping");
                    write.send(ping_frame()).await?;
                    awaiting_pong = true;
                    continue;
                }
                Ok(None) => return Err(PusherError::Closed("stream ended".into())),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(msg))) => msg,
            };
            awaiting_pong = false;

            match msg {
                Message::Text(text) => {
                    let flow = self
                        .handle_text(&text, &mut write, backoff, &mut activity_timeout)
                        .await?;
                    if let Flow::Stop = flow {
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
                Message::Ping(data) => write.send(Message::Pong(data)).await?,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "close frame".to_string());
                    return Err(PusherError::Closed(reason));
                }
                _ => {}
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        write: &mut WsSink,
        backoff: &mut Backoff,
        activity_timeout: &mut Duration,
    ) -> Result<Flow, PusherError> {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable push frame");
                return Ok(Flow::Continue);
            }
        };

        match frame.event.as_str() {
            "pusher:connection_established" => {
                let established: ConnectionEstablished = frame_data(&frame.data)
                    .map_err(|e| PusherError::Protocol(format!("connection_established: {e}")))?;
                if let Some(secs) = established.activity_timeout.filter(|s| *s > 0) {
                    *activity_timeout = Duration::from_secs(secs);
                }
                info!(socket_id = %established.socket_id, "Push connection established");
                self.subscribe_all(&established.socket_id, write).await?;
                backoff.reset();
            }
            "pusher:ping" => write.send(pong_frame()).await?,
            "pusher:pong" => debug!("Keep-alive acknowledged"),
            "pusher_internal:subscription_succeeded" => {
                info!(channel = ?frame.channel, "Subscribed to push channel");
            }
            "pusher:subscription_error" | "pusher:error" => {
                warn!(event = %frame.event, channel = ?frame.channel, data = %frame.data, "Push service error");
            }
            event => {
                let channel = frame.channel.as_deref().unwrap_or_default();
                match dispatch(&self.bindings, channel, event, &frame.data) {
                    Some(decoded) => {
                        if !forward(&self.tx, decoded).await {
                            return Ok(Flow::Stop);
                        }
                    }
                    None => debug!(channel, event, "Ignoring unbound push event"),
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Authorize and subscribe every channel on a fresh socket.
    async fn subscribe_all(&self, socket_id: &str, write: &mut WsSink) -> Result<(), PusherError> {
        for channel in self.bindings.channels() {
            let header = self.auth.current_auth_header()?;
            let auth = self
                .api
                .authorize_channel(&header, socket_id, channel)
                .await
                .map_err(|source| PusherError::ChannelAuth {
                    channel: channel.to_string(),
                    source,
                })?;
            write.send(subscribe_frame(channel, &auth)).await?;
            debug!(channel, "Subscription requested");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
