//! Reconnecting client handle and its background connection task.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::{Session, StateResult};
use beacon_protocol::{codec, ClientFrame, EventKind, StateAction};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Commands ────────────────────────────────────────────────────────────────

enum Command {
    Send(String),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    UnsubscribeAll,
    Broadcast {
        channels: Option<Vec<String>>,
        data: Value,
    },
    Authenticate {
        password: String,
        device: String,
    },
    StateGet {
        channel: String,
        req_id: u64,
        reply: oneshot::Sender<Result<StateResult>>,
    },
    Forget(u64),
    Listen(mpsc::UnboundedSender<Value>),
    Disconnect,
    Reconnect,
}

// ── BeaconClient (public handle) ────────────────────────────────────────────

/// A logical session with a Beacon relay that survives reconnects.
///
/// Sends made while the link is down are queued and flushed in order once it
/// comes back, followed by one `subscribe` for every remembered channel.
/// Must be created inside a Tokio runtime.
pub struct BeaconClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    next_req_id: AtomicU64,
    config: ClientConfig,
    _task: JoinHandle<()>,
}

impl BeaconClient {
    /// Start the connection task. Returns immediately; the first connection
    /// attempt happens in the background.
    #[must_use]
    pub fn connect(config: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(connection_task(
            cmd_rx,
            config.clone(),
            Arc::clone(&connected),
        ));

        Self {
            cmd_tx,
            connected,
            next_req_id: AtomicU64::new(1),
            config,
            _task: task,
        }
    }

    /// Listen for inbound messages that are not state replies.
    ///
    /// Every listener receives every message that arrives after it was
    /// registered. The stream ends when the client task stops.
    #[must_use]
    pub fn events(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        // A stopped task drops `tx`, so `rx` just yields `None`
        let _ = self.command(Command::Listen(tx));
        rx
    }

    /// Whether a physical connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| ClientError::Closed)
    }

    /// Send any serializable frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame cannot be encoded or the client task has stopped.
    pub fn send<T: Serialize>(&self, frame: &T) -> Result<()> {
        self.command(Command::Send(codec::encode(frame)?))
    }

    /// Subscribe to channels. They are re-subscribed after every reconnect.
    pub fn subscribe<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(Command::Subscribe(
            channels.into_iter().map(Into::into).collect(),
        ))
    }

    /// Unsubscribe from channels this client is subscribed to.
    pub fn unsubscribe<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(Command::Unsubscribe(
            channels.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn unsubscribe_all(&self) -> Result<()> {
        self.command(Command::UnsubscribeAll)
    }

    /// Broadcast to the given channels.
    pub fn broadcast<I, S>(&self, channels: I, data: Value) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(Command::Broadcast {
            channels: Some(channels.into_iter().map(Into::into).collect()),
            data,
        })
    }

    /// Broadcast to every channel this client is subscribed to.
    pub fn broadcast_subscribed(&self, data: Value) -> Result<()> {
        self.command(Command::Broadcast {
            channels: None,
            data,
        })
    }

    /// Merge `data` into a channel's state document.
    pub fn state_add(&self, channel: impl Into<String>, data: Value) -> Result<()> {
        self.send(&ClientFrame::state(channel, StateAction::Add, data, None))
    }

    /// Remove keys from a channel's state document.
    pub fn state_remove<I, S>(&self, channel: impl Into<String>, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(|key| Value::String(key.into()))
            .collect();
        self.send(&ClientFrame::state(
            channel,
            StateAction::Remove,
            Value::Array(keys),
            None,
        ))
    }

    /// Read a channel's state document.
    ///
    /// Resolves when the matching reply arrives. Without a configured
    /// `state_request_timeout` this waits indefinitely, including across
    /// reconnects that lose the reply.
    ///
    /// # Errors
    ///
    /// [`ClientError::Timeout`] if the timeout elapses,
    /// [`ClientError::Disconnected`] if `disconnect()` is called first.
    pub async fn state_get(&self, channel: impl Into<String>) -> Result<StateResult> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.command(Command::StateGet {
            channel: channel.into(),
            req_id,
            reply,
        })?;

        let outcome = match self.config.state_request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = self.command(Command::Forget(req_id));
                    return Err(ClientError::Timeout(req_id));
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| ClientError::Closed)?
    }

    /// Authenticate as a producer. The credentials are re-sent after every
    /// reconnect, before queued frames.
    pub fn authenticate(&self, password: impl Into<String>, device: impl Into<String>) -> Result<()> {
        self.command(Command::Authenticate {
            password: password.into(),
            device: device.into(),
        })
    }

    /// Emit a producer event.
    pub fn emit(&self, kind: EventKind, data: Value) -> Result<()> {
        self.send(&ClientFrame::event(kind, data))
    }

    /// Ask the relay to forward a request to a producer device.
    pub fn request(&self, device: impl Into<String>) -> Result<()> {
        self.send(&ClientFrame::Request {
            device: Some(device.into()),
        })
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Subscriptions and credentials are forgotten; frames sent afterwards
    /// are queued until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Resume connecting after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }
}

// ── Background connection task ──────────────────────────────────────────────

struct Link {
    ws: Option<WsStream>,
    /// Next connection attempt; `None` after an explicit disconnect.
    retry_at: Option<Instant>,
    attempt: u32,
}

async fn connection_task(
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    config: ClientConfig,
    connected: Arc<AtomicBool>,
) {
    let mut session = Session::new();
    let mut listeners = Vec::new();
    let mut link = Link {
        ws: None,
        retry_at: Some(Instant::now()),
        attempt: 0,
    };

    loop {
        if let Some(ws) = link.ws.as_mut() {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, Command::Disconnect) {
                        if let Some(mut ws) = link.ws.take() {
                            let _ = ws.close(None).await;
                        }
                    }
                    let out = apply(&mut session, &mut link, &mut listeners, cmd);
                    if let Some(ws) = link.ws.as_mut() {
                        if let Err(unsent) = write_all(ws, out).await {
                            session.requeue(unsent);
                            drop_link(&mut session, &mut link, &connected, &config);
                        }
                    } else {
                        connected.store(false, Ordering::SeqCst);
                    }
                }

                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => deliver(&mut session, &mut listeners, &text),
                        Some(Ok(Message::Binary(data))) => {
                            deliver(&mut session, &mut listeners, &String::from_utf8_lossy(&data));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Server closed the connection");
                            drop_link(&mut session, &mut link, &connected, &config);
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Connection error");
                            drop_link(&mut session, &mut link, &connected, &config);
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        } else {
            let retry = link.retry_at;
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    let out = apply(&mut session, &mut link, &mut listeners, cmd);
                    // Not connected, so `apply` queued rather than emitted
                    debug_assert!(out.is_empty());
                }

                _ = sleep_until(retry.unwrap_or_else(Instant::now)), if retry.is_some() => {
                    session.begin_connect();
                    match connect_async(config.url.as_str()).await {
                        Ok((mut ws, _)) => {
                            info!(url = %config.url, "Connected");
                            let replay = session.connected();
                            match write_all(&mut ws, replay).await {
                                Ok(()) => {
                                    link.ws = Some(ws);
                                    link.attempt = 0;
                                    connected.store(true, Ordering::SeqCst);
                                }
                                Err(unsent) => {
                                    session.requeue(unsent);
                                    drop_link(&mut session, &mut link, &connected, &config);
                                }
                            }
                        }
                        Err(e) => {
                            warn!(url = %config.url, error = %e, "Connection attempt failed");
                            drop_link(&mut session, &mut link, &connected, &config);
                        }
                    }
                }
            }
        }
    }

    if let Some(mut ws) = link.ws.take() {
        let _ = ws.close(None).await;
    }
    connected.store(false, Ordering::SeqCst);
    debug!("Client task stopped");
}

/// Apply a command to the session. Returns frames to write now.
fn apply(
    session: &mut Session,
    link: &mut Link,
    listeners: &mut Vec<mpsc::UnboundedSender<Value>>,
    cmd: Command,
) -> Vec<String> {
    let out = match cmd {
        Command::Send(text) => session.submit(text),
        Command::Subscribe(channels) => session.subscribe(channels),
        Command::Unsubscribe(channels) => session.unsubscribe(channels),
        Command::UnsubscribeAll => session.unsubscribe_all(),
        Command::Broadcast { channels, data } => session.broadcast(channels, data),
        Command::Authenticate { password, device } => session.authenticate(password, device),
        Command::StateGet {
            channel,
            req_id,
            reply,
        } => session.state_get(channel, req_id, reply),
        Command::Forget(req_id) => {
            session.forget(req_id);
            None
        }
        Command::Listen(tx) => {
            listeners.push(tx);
            None
        }
        Command::Disconnect => {
            info!("Disconnecting");
            session.close();
            link.ws = None;
            link.retry_at = None;
            None
        }
        Command::Reconnect => {
            if link.ws.is_none() && link.retry_at.is_none() {
                link.retry_at = Some(Instant::now());
                link.attempt = 0;
            }
            None
        }
    };
    out.into_iter().collect()
}

/// Write frames in order. On failure returns the frames not yet written.
async fn write_all(ws: &mut WsStream, frames: Vec<String>) -> std::result::Result<(), Vec<String>> {
    let mut frames = frames.into_iter();
    while let Some(text) = frames.next() {
        if let Err(e) = ws.send(Message::Text(text.clone())).await {
            warn!(error = %e, "Send failed");
            let mut unsent = vec![text];
            unsent.extend(frames);
            return Err(unsent);
        }
    }
    Ok(())
}

fn drop_link(session: &mut Session, link: &mut Link, connected: &AtomicBool, config: &ClientConfig) {
    link.ws = None;
    connected.store(false, Ordering::SeqCst);
    if link.retry_at.is_none() {
        return;
    }
    session.disconnected();
    let delay = config.reconnect.delay_for(link.attempt);
    link.attempt = link.attempt.saturating_add(1);
    link.retry_at = Some(Instant::now() + delay);
    debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
}

/// Hand a non-correlated message to every listener, pruning dropped ones.
fn deliver(session: &mut Session, listeners: &mut Vec<mpsc::UnboundedSender<Value>>, text: &str) {
    if let Some(value) = session.receive(text) {
        listeners.retain(|tx| tx.send(value.clone()).is_ok());
    }
}
