//! Realtime push channel.
//!
//! One WebSocket connection per running client, reconnected with exponential
//! back-off until [`RealtimeChannel::disconnect`] is called. Frames are JSON
//! objects of the form `{"event": <name>, "data": <payload>}`.
//!
//! ## Admin topic
//!
//! The `subscribe:admin-dashboard` control message is sent on every
//! successful (re)connection while the session holds an administrator, and
//! whenever the session turns into an administrator on a live connection.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::donation::DonationNotice;
use crate::errors::{PortalError, Result};
use crate::principal::Administrator;
use crate::session::SessionState;
use crate::stats::DashboardStats;

/// Control event asking the server for administrator dashboard pushes.
pub const ADMIN_TOPIC_SUBSCRIBE: &str = "subscribe:admin-dashboard";

const EVENT_BUFFER: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────

/// Inbound events consumed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "stats-snapshot")]
    StatsSnapshot(DashboardStats),
    #[serde(rename = "donation-created")]
    DonationCreated(DonationNotice),
}

#[derive(Serialize)]
struct ControlFrame<'a> {
    event: &'a str,
}

/// Decode a text frame; unknown events and malformed frames yield `None`.
pub fn decode_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Ignoring push frame ({e}): {text}");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
}

impl From<&Config> for ChannelConfig {
    fn from(config: &Config) -> Self {
        Self {
            url: config.realtime_url.clone(),
            reconnect_initial: Duration::from_millis(config.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// Handle to the application-scoped push connection.
pub struct RealtimeChannel {
    connected: watch::Receiver<bool>,
    events: broadcast::Sender<PushEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Spawn the connection task. Must be called from within a Tokio runtime.
    pub fn connect(config: ChannelConfig, session: watch::Receiver<SessionState>) -> Self {
        let (connected_tx, connected) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            config,
            session,
            connected_tx,
            events.clone(),
            cancel.clone(),
        ));

        Self {
            connected,
            events,
            cancel,
            task,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch connection liveness.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Receive every push event delivered after this call.
    pub fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Realtime task ended abnormally: {e}");
        }
        info!("Realtime channel disconnected");
    }
}

enum ConnectionEnd {
    Cancelled,
    Dropped(String),
}

async fn run(
    config: ChannelConfig,
    mut session: watch::Receiver<SessionState>,
    connected: watch::Sender<bool>,
    events: broadcast::Sender<PushEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = config.reconnect_initial;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())) => attempt,
        };

        match attempt {
            Ok(Ok((socket, _response))) => {
                info!("Realtime channel connected to {}", config.url);
                backoff = config.reconnect_initial;
                connected.send_replace(true);
                let end = serve_connection(socket, &mut session, &events, &cancel).await;
                connected.send_replace(false);
                match end {
                    ConnectionEnd::Cancelled => break,
                    ConnectionEnd::Dropped(reason) => {
                        warn!("Realtime connection lost: {reason}");
                    }
                }
            }
            Ok(Err(e)) => warn!("Realtime connect failed (will retry in {backoff:?}): {e}"),
            Err(_) => warn!("Realtime connect timed out (will retry in {backoff:?})"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }

    connected.send_replace(false);
}

async fn serve_connection(
    socket: Socket,
    session: &mut watch::Receiver<SessionState>,
    events: &broadcast::Sender<PushEvent>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (mut sink, mut source) = socket.split();

    // Administrator this connection is subscribed for.
    let mut subscribed_as: Option<Administrator> = None;
    let mut session_open = true;

    let current = admin_of(&session.borrow_and_update());
    if let Some(admin) = current {
        if let Err(e) = send_subscribe(&mut sink).await {
            return ConnectionEnd::Dropped(e.to_string());
        }
        subscribed_as = Some(admin);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return ConnectionEnd::Cancelled;
            }
            changed = session.changed(), if session_open => {
                if changed.is_err() {
                    debug!("Session context dropped; topic subscription frozen");
                    session_open = false;
                    continue;
                }
                let admin = admin_of(&session.borrow_and_update());
                match admin {
                    Some(admin) if subscribed_as.as_ref() != Some(&admin) => {
                        if let Err(e) = send_subscribe(&mut sink).await {
                            return ConnectionEnd::Dropped(e.to_string());
                        }
                        subscribed_as = Some(admin);
                    }
                    Some(_) => {}
                    None => subscribed_as = None,
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_frame(&text) {
                        // No receivers simply means no view is listening.
                        let _ = events.send(event);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return ConnectionEnd::Dropped(format!("closed by server: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ConnectionEnd::Dropped(e.to_string()),
                None => return ConnectionEnd::Dropped("stream ended".to_string()),
            }
        }
    }
}

fn admin_of(state: &SessionState) -> Option<Administrator> {
    match state {
        SessionState::AuthenticatedAdmin(admin) => Some(admin.clone()),
        SessionState::Booting | SessionState::Anonymous | SessionState::AuthenticatedDonor(_) => {
            None
        }
    }
}

async fn send_subscribe<S>(sink: &mut S) -> Result<()>
where
    S: Sink<Message> + Unpin,
    PortalError: From<S::Error>,
{
    let frame = serde_json::to_string(&ControlFrame {
        event: ADMIN_TOPIC_SUBSCRIBE,
    })?;
    sink.send(Message::Text(frame)).await?;
    debug!("Subscribed to admin dashboard topic");
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
