//! Connection state machine for the market stream.
//!
//! One `ConnectionSession` owns one logical subscription. It runs as a
//! spawned task driven by operator commands (`open`/`close`/`reconnect`)
//! and publishes every state transition over a watch channel so
//! dependents react without polling.
//!
//! Reconnection: any non-operator teardown (network error, server close,
//! heartbeat loss) schedules a retry after an exponential backoff delay;
//! the retry counter resets to zero on every successful open. Once the
//! retry budget is exhausted the session surfaces a terminal `Error`
//! state and waits for a manual `open`/`reconnect`.
//!
//! `close()` is the only path to `Disconnected`: it is flagged as
//! intentional before the socket drops, and an in-flight connect is
//! aborted by dropping its future, so a late-completing open can never
//! resurrect a session the operator shut down.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::wire::{decode_frame, FeedEvent, SubscribeMessage, SubscriptionOp};

/// Default market channel endpoint.
pub const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for a connection session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint for the market channel.
    pub ws_url: String,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// Reconnect policy.
    pub backoff: BackoffPolicy,
    /// Cadence of the liveness check (and outbound keep-alive).
    pub heartbeat_interval: Duration,
    /// Maximum silence before the connection is treated as dead.
    pub heartbeat_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Parameters of the active subscription, retained across failures so a
/// reconnect needs no caller re-input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionParams {
    /// Token IDs to subscribe to.
    pub asset_ids: Vec<String>,
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: retry budget exhausted, manual reconnect required.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Full observable state of the session, published on every transition.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failures since the last successful open.
    pub retry_count: u32,
    /// When the last inbound event of any kind arrived.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// The subscription in effect (or last requested).
    pub last_request: Option<SubscriptionParams>,
    /// Set when `status` is `Error`.
    pub last_error: Option<String>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            last_heartbeat_at: None,
            last_request: None,
            last_error: None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Open(SubscriptionParams),
    Close,
    Reconnect,
}

#[derive(Debug, Error)]
enum StreamFailure {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timeout")]
    ConnectTimeout,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("server closed the stream")]
    ServerClosed,

    #[error("stream ended unexpectedly")]
    StreamEnded,

    #[error("no inbound event within the heartbeat timeout")]
    HeartbeatTimeout,
}

/// Why a connect/stream attempt returned.
enum StreamExit {
    /// Operator close (or consumer gone): suppress all reconnection.
    OperatorClose,
    /// Restart immediately without touching the retry counter.
    Restart,
    /// Non-intentional teardown: subject to the backoff policy.
    Failure(StreamFailure),
}

enum BackoffOutcome {
    Elapsed,
    Close,
    Retry,
}

/// Cloneable handle for driving a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Open (or extend) the subscription.
    pub async fn open(&self, params: SubscriptionParams) {
        self.send(Command::Open(params)).await;
    }

    /// Operator-initiated close; suppresses all automatic reconnection.
    pub async fn close(&self) {
        self.send(Command::Close).await;
    }

    /// Manually re-establish the last requested subscription.
    pub async fn reconnect(&self) {
        self.send(Command::Reconnect).await;
    }

    /// Latest published state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Observer for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).await.is_err() {
            debug!("session task already stopped, command dropped");
        }
    }
}

/// Spawn a connection session task.
///
/// Returns the driving handle and the receiver of decoded feed events.
/// Events are delivered strictly in arrival order on this single queue.
pub fn spawn(config: SessionConfig) -> (SessionHandle, mpsc::Receiver<FeedEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (state_tx, state_rx) = watch::channel(ConnectionState::new());

    let task = SessionTask {
        config,
        cmd_rx,
        event_tx,
        state_tx,
        state: ConnectionState::new(),
    };
    tokio::spawn(task.run());

    (SessionHandle { cmd_tx, state_rx }, event_rx)
}

struct SessionTask {
    config: SessionConfig,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<FeedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                return;
            };
            match cmd {
                Command::Open(params) => {
                    self.state.last_request = Some(params);
                    self.connect_cycle().await;
                }
                Command::Reconnect => {
                    if self.state.last_request.is_some() {
                        self.connect_cycle().await;
                    } else {
                        warn!("reconnect requested before any open, ignoring");
                    }
                }
                Command::Close => {}
            }
        }
    }

    /// Drive connect/stream/retry until operator close or terminal error.
    async fn connect_cycle(&mut self) {
        self.state.retry_count = 0;
        self.state.last_error = None;

        loop {
            self.publish(ConnectionStatus::Connecting);

            match self.connect_and_stream().await {
                StreamExit::OperatorClose => {
                    self.state.retry_count = 0;
                    self.publish(ConnectionStatus::Disconnected);
                    info!("session closed");
                    return;
                }
                StreamExit::Restart => continue,
                StreamExit::Failure(failure) => {
                    self.state.retry_count += 1;

                    if self.config.backoff.exhausted(self.state.retry_count) {
                        self.state.last_error = Some(failure.to_string());
                        error!(
                            failures = self.state.retry_count,
                            "stream failure: {failure}; retry budget exhausted"
                        );
                        self.publish(ConnectionStatus::Error);
                        return;
                    }

                    let delay = self.config.backoff.delay(self.state.retry_count - 1);
                    warn!(
                        retry = self.state.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "stream failure: {failure}; reconnecting"
                    );
                    self.publish(ConnectionStatus::Connecting);

                    match self.wait_backoff(delay).await {
                        BackoffOutcome::Elapsed | BackoffOutcome::Retry => continue,
                        BackoffOutcome::Close => {
                            self.state.retry_count = 0;
                            self.publish(ConnectionStatus::Disconnected);
                            info!("session closed during reconnect delay");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One connect attempt plus the connected event loop.
    async fn connect_and_stream(&mut self) -> StreamExit {
        let Some(params) = self.state.last_request.clone() else {
            return StreamExit::OperatorClose;
        };

        info!(url = %self.config.ws_url, "connecting to market stream");
        let connect = timeout(
            self.config.connect_timeout,
            connect_async(self.config.ws_url.clone()),
        );
        tokio::pin!(connect);

        let ws = loop {
            tokio::select! {
                res = &mut connect => match res {
                    Ok(Ok((stream, _response))) => break stream,
                    Ok(Err(e)) => return StreamExit::Failure(StreamFailure::Connect(e.to_string())),
                    Err(_) => return StreamExit::Failure(StreamFailure::ConnectTimeout),
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    // Dropping the pinned connect future aborts the
                    // in-flight open.
                    Some(Command::Close) | None => return StreamExit::OperatorClose,
                    Some(Command::Open(p)) => {
                        self.state.last_request = Some(p);
                        return StreamExit::Restart;
                    }
                    Some(Command::Reconnect) => {}
                },
            }
        };

        info!("market stream connected");
        self.state.retry_count = 0;
        self.state.last_error = None;
        self.state.last_heartbeat_at = Some(Utc::now());

        let (mut write, mut read) = ws.split();

        let subscribe = SubscribeMessage::market(&params.asset_ids);
        let payload = match serde_json::to_string(&subscribe) {
            Ok(p) => p,
            Err(e) => return StreamExit::Failure(StreamFailure::Subscribe(e.to_string())),
        };
        if let Err(e) = write.send(Message::Text(payload)).await {
            return StreamExit::Failure(StreamFailure::WebSocket(e.to_string()));
        }
        info!(tokens = params.asset_ids.len(), "subscription sent");
        self.publish(ConnectionStatus::Connected);

        let mut liveness = interval(self.config.heartbeat_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.state.last_heartbeat_at = Some(Utc::now());
                        for event in decode_frame(&text) {
                            if self.event_tx.send(event).await.is_err() {
                                info!("event consumer dropped, closing stream");
                                return StreamExit::OperatorClose;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        self.state.last_heartbeat_at = Some(Utc::now());
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        self.state.last_heartbeat_at = Some(Utc::now());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed the stream");
                        return StreamExit::Failure(StreamFailure::ServerClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return StreamExit::Failure(StreamFailure::WebSocket(e.to_string()));
                    }
                    None => return StreamExit::Failure(StreamFailure::StreamEnded),
                },

                _ = liveness.tick() => {
                    let silent_too_long = self
                        .state
                        .last_heartbeat_at
                        .map(|last| {
                            Utc::now()
                                .signed_duration_since(last)
                                .to_std()
                                .map_or(false, |e| e > self.config.heartbeat_timeout)
                        })
                        .unwrap_or(false);
                    if silent_too_long {
                        warn!("no inbound event within heartbeat timeout, forcing reconnect");
                        return StreamExit::Failure(StreamFailure::HeartbeatTimeout);
                    }
                    let _ = write.send(Message::Text("PING".into())).await;
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return StreamExit::OperatorClose;
                    }
                    Some(Command::Open(p)) => {
                        // Extend the live subscription in place.
                        self.state.last_request = Some(p.clone());
                        let op = SubscriptionOp {
                            assets_ids: p.asset_ids,
                            operation: "subscribe",
                        };
                        match serde_json::to_string(&op) {
                            Ok(payload) => {
                                if write.send(Message::Text(payload)).await.is_err() {
                                    return StreamExit::Failure(StreamFailure::StreamEnded);
                                }
                            }
                            Err(e) => warn!("subscription update failed to encode: {e}"),
                        }
                    }
                    Some(Command::Reconnect) => {
                        info!("manual reconnect requested, restarting stream");
                        return StreamExit::Restart;
                    }
                },
            }
        }
    }

    /// Sleep out a reconnect delay, still responsive to commands.
    async fn wait_backoff(&mut self, delay: Duration) -> BackoffOutcome {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => BackoffOutcome::Elapsed,
            cmd = self.cmd_rx.recv() => match cmd {
                Some(Command::Close) | None => BackoffOutcome::Close,
                Some(Command::Open(p)) => {
                    self.state.last_request = Some(p);
                    BackoffOutcome::Retry
                }
                Some(Command::Reconnect) => BackoffOutcome::Retry,
            },
        }
    }

    fn publish(&mut self, status: ConnectionStatus) {
        self.state.status = status;
        let _ = self.state_tx.send(self.state.clone());
    }
}
