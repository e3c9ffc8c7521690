//! Physical connection lifecycle.
//!
//! [`Connector`] keeps exactly one logical session with the server. The
//! initial dial and handshake run on the caller's task so failures surface
//! from [`Connector::connect`]; afterwards a background task owns the
//! socket, forwards inbound frames to the [`FrameSink`], writes outbound
//! frames, and on unexpected loss reconnects with a bounded exponential
//! delay, resuming the session when the server still knows it.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::lifecycle::{ConnectionState, LifecycleEvent, LifecycleListener, LifecycleListeners};
use super::messages::{
    Account, CONTINUE, Envelope, INVALID, Invalid, READY, REGISTER_CONTROL, RESUME, Ready,
    RegisterControl, ResumeSession,
};
use crate::error::{LinkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives every inbound frame that is not part of a handshake.
pub type FrameSink = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Server WebSocket URL.
    pub url: String,
    /// Client identifier attached to the handshake.
    pub agent: String,
    /// Client version attached to the handshake.
    pub version: String,
    /// Delay before the first reconnect attempt.
    pub initial_reconnect_delay: Duration,
    /// Upper bound for the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Timeout for dial plus handshake; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl ConnectorConfig {
    /// Creates a configuration for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            initial_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(60),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Returns the delay before reconnect attempt `attempt` (0-based):
    /// `min(initial * 2^attempt, max)`.
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_reconnect_delay
            .checked_mul(factor)
            .map_or(self.max_reconnect_delay, |d| d.min(self.max_reconnect_delay))
    }
}

enum ConnCmd {
    Frame {
        envelope: Envelope,
        ack: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
}

enum Handshake {
    Fresh(Ready),
    Resumed,
}

/// Why the connected loop stopped.
enum Interrupt {
    Close {
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
    Dropped(String),
    Gone,
}

struct Shared {
    token: Mutex<Option<String>>,
    session_token: Mutex<String>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<ConnCmd>>>,
    state: watch::Sender<ConnectionState>,
    listeners: LifecycleListeners,
    closed: AtomicBool,
    close_emitted: AtomicBool,
    seq: AtomicU64,
    sink: FrameSink,
}

impl Shared {
    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session_token(&self) -> String {
        self.session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session_token(&self, session_token: String) {
        *self
            .session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = session_token;
    }

    fn commands(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<ConnCmd>>> {
        self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a fresh command channel unless the connector was closed.
    fn reopen_commands(&self) -> Option<mpsc::UnboundedReceiver<ConnCmd>> {
        let mut slot = self.commands();
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Some(rx)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Final transition after an intentional close. Emits `close` at most
    /// once.
    fn finish_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        if self.close_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("connection closed");
        self.listeners.emit(&LifecycleEvent::Close);
    }
}

/// Handle to the single logical server connection.
pub struct Connector {
    config: Arc<ConnectorConfig>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a disconnected connector delivering inbound frames to `sink`.
    #[must_use]
    pub fn new(config: ConnectorConfig, sink: FrameSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                token: Mutex::new(None),
                session_token: Mutex::new(String::new()),
                cmd_tx: Mutex::new(None),
                state,
                listeners: LifecycleListeners::new(),
                closed: AtomicBool::new(false),
                close_emitted: AtomicBool::new(false),
                seq: AtomicU64::new(0),
                sink,
            }),
        }
    }

    /// Sets the access token used by the next `register_control` handshake.
    pub fn set_token(&self, token: impl Into<String>) {
        *self
            .shared
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Registers a lifecycle listener.
    pub fn on_lifecycle(&self, listener: LifecycleListener) {
        self.shared.listeners.add(listener);
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits until the connection reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Closed`] if the connector is dropped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| LinkError::Closed)
    }

    /// Returns the next outbound sequence number.
    pub(crate) fn next_seq(&self) -> u64 {
        self.shared.next_seq()
    }

    /// Dials the server and performs the `register_control` handshake.
    ///
    /// Emits [`LifecycleEvent::Connect`] before returning. Calling it while
    /// already connecting or connected is a no-op.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Closed`] after [`Connector::close`], including a close
    ///   that lands while the handshake is in flight.
    /// - [`LinkError::Authentication`] if no token is set or the server
    ///   rejects it.
    /// - [`LinkError::Transport`] for dial and socket failures.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        if self.shared.token().is_none() {
            return Err(LinkError::Authentication("token not set".to_string()));
        }

        let started = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            tracing::debug!("connect called while already active");
            return Ok(());
        }

        tracing::info!(url = %self.config.url, "connecting");
        let (mut ws, ready) = match establish(&self.config, &self.shared, None).await {
            Ok((ws, Handshake::Fresh(ready))) => (ws, ready),
            Ok((_, Handshake::Resumed)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(LinkError::Protocol(
                    "server resumed a session that was never requested".to_string(),
                ));
            }
            Err(err) => {
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %err, "connect failed");
                return Err(err);
            }
        };

        // The closed check and the channel install share the lock `close`
        // takes, so a close either aborts here or finds the channel.
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let installed = {
            let mut slot = self.shared.commands();
            if self.shared.closed.load(Ordering::SeqCst) {
                false
            } else {
                *slot = Some(cmd_tx);
                self.shared.set_state(ConnectionState::Connected);
                true
            }
        };
        if !installed {
            let _ = ws.close(None).await;
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(LinkError::Closed);
        }

        self.shared.set_session_token(ready.session_token);
        let (started_tx, started_rx) = oneshot::channel();
        let start = Start::Fresh {
            ws,
            account: ready.account,
            started: started_tx,
        };
        tokio::spawn(supervise(
            Arc::clone(&self.config),
            Arc::clone(&self.shared),
            start,
            cmd_rx,
        ));
        // Fails only if the session task died while emitting `connect`; the
        // supervisor has already begun recovery.
        let _ = started_rx.await;
        Ok(())
    }

    /// Writes one frame, resolving once it has been handed to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] unless connected, or
    /// [`LinkError::Transport`] if the write fails.
    pub async fn send_frame(&self, mut envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let tx = self.shared.commands().clone().ok_or(LinkError::NotConnected)?;

        if envelope.seq.is_none() {
            envelope.seq = Some(self.next_seq());
        }
        let (ack, ack_rx) = oneshot::channel();
        tx.send(ConnCmd::Frame { envelope, ack })
            .map_err(|_| LinkError::NotConnected)?;
        ack_rx.await.map_err(|_| LinkError::NotConnected)?
    }

    /// Permanently closes the connection with the given close code.
    ///
    /// Idempotent: the first call releases the socket (if any), cancels
    /// pending reconnects, and emits [`LifecycleEvent::Close`]; later calls
    /// return immediately.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tx = self.shared.commands().take();
        if let Some(tx) = tx {
            let (done, done_rx) = oneshot::channel();
            let cmd = ConnCmd::Close {
                code,
                reason: reason.to_string(),
                done,
            };
            if tx.send(cmd).is_ok() && done_rx.await.is_ok() {
                return;
            }
        }
        self.shared.finish_close();
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        // Ends the session task once its command channel closes.
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.commands().take();
    }
}

/// How a session task begins.
enum Start {
    /// Right after a successful `connect`.
    Fresh {
        ws: WsStream,
        account: Account,
        started: oneshot::Sender<()>,
    },
    /// After the previous session task died; the socket is gone.
    Recover,
}

/// Runs the session task and restarts it if it panics.
///
/// A panic in an inbound handler or lifecycle listener unwinds the session
/// task and drops its socket. That is treated as a connection drop: a new
/// task emits `drop` and reconnects with the stored session token.
async fn supervise(
    config: Arc<ConnectorConfig>,
    shared: Arc<Shared>,
    start: Start,
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
) {
    let session = Session {
        config: Arc::clone(&config),
        shared: Arc::clone(&shared),
    };
    let mut task = tokio::spawn(session.run(start, cmd_rx));
    loop {
        match task.await {
            Ok(()) => return,
            Err(err) if err.is_panic() => {
                tracing::error!(error = %err, "session task panicked, treating as drop");
                let Some(cmd_rx) = shared.reopen_commands() else {
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                };
                let session = Session {
                    config: Arc::clone(&config),
                    shared: Arc::clone(&shared),
                };
                task = tokio::spawn(session.run(Start::Recover, cmd_rx));
            }
            Err(err) => {
                tracing::debug!(error = %err, "session task cancelled");
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// State owned by the background socket task.
struct Session {
    config: Arc<ConnectorConfig>,
    shared: Arc<Shared>,
}

impl Session {
    async fn run(self, start: Start, mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>) {
        let mut ws = match start {
            Start::Fresh {
                ws,
                account,
                started,
            } => {
                tracing::info!(account = %account.name, "connected");
                self.shared
                    .listeners
                    .emit(&LifecycleEvent::Connect { account });
                let _ = started.send(());
                ws
            }
            Start::Recover => {
                self.shared.set_state(ConnectionState::Connecting);
                self.shared.listeners.emit(&LifecycleEvent::Drop);
                match self.recover(&mut cmd_rx).await {
                    Some(ws) => ws,
                    None => return,
                }
            }
        };

        loop {
            match self.pump(&mut ws, &mut cmd_rx).await {
                Interrupt::Close { code, reason, done } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(err) = ws.close(Some(frame)).await {
                        tracing::debug!(error = %err, "close frame not delivered");
                    }
                    self.shared.finish_close();
                    let _ = done.send(());
                    return;
                }
                Interrupt::Gone => {
                    let _ = ws.close(None).await;
                    self.shared.set_state(ConnectionState::Disconnected);
                    return;
                }
                Interrupt::Dropped(reason) => {
                    tracing::warn!(%reason, "connection dropped");
                    self.shared.set_state(ConnectionState::Connecting);
                    self.shared.listeners.emit(&LifecycleEvent::Drop);
                }
            }

            match self.recover(&mut cmd_rx).await {
                Some(new_ws) => ws = new_ws,
                None => return,
            }
        }
    }

    /// Reconnects after a drop. Returns `None` once the session has ended.
    async fn recover(&self, cmd_rx: &mut mpsc::UnboundedReceiver<ConnCmd>) -> Option<WsStream> {
        match self.reconnect(cmd_rx).await {
            Ok((ws, event)) => {
                self.shared.set_state(ConnectionState::Connected);
                self.shared.listeners.emit(&event);
                Some(ws)
            }
            Err(Interrupt::Close { done, .. }) => {
                self.shared.finish_close();
                let _ = done.send(());
                None
            }
            Err(Interrupt::Gone) => {
                self.shared.set_state(ConnectionState::Disconnected);
                None
            }
            Err(Interrupt::Dropped(reason)) => {
                tracing::error!(%reason, "reconnect rejected, giving up");
                self.shared.finish_close();
                None
            }
        }
    }

    /// Connected loop: forwards frames in both directions until interrupted.
    async fn pump(
        &self,
        ws: &mut WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<ConnCmd>,
    ) -> Interrupt {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Frame { envelope, ack }) => {
                        let text = match envelope.to_text() {
                            Ok(text) => text,
                            Err(err) => {
                                let _ = ack.send(Err(err));
                                continue;
                            }
                        };
                        tracing::trace!(kind = %envelope.kind, "sending frame");
                        if let Err(err) = ws.send(Message::text(text)).await {
                            let reason = err.to_string();
                            let _ = ack.send(Err(LinkError::from(err)));
                            return Interrupt::Dropped(reason);
                        }
                        let _ = ack.send(Ok(()));
                    }
                    Some(ConnCmd::Close { code, reason, done }) => {
                        return Interrupt::Close { code, reason, done };
                    }
                    None => return Interrupt::Gone,
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => match Envelope::from_text(&text) {
                        Ok(envelope) => (self.shared.sink)(envelope),
                        Err(err) => tracing::warn!(error = %err, "discarding frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "server closed the connection".to_string(),
                            |f| format!("server closed the connection ({} {})", u16::from(f.code), f.reason.as_str()),
                        );
                        return Interrupt::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Interrupt::Dropped(err.to_string()),
                    None => return Interrupt::Dropped("stream ended".to_string()),
                },
            }
        }
    }

    /// Retries until a session is re-established or the loop is cancelled.
    ///
    /// `Err(Interrupt::Dropped)` means the server rejected the credentials.
    async fn reconnect(
        &self,
        cmd_rx: &mut mpsc::UnboundedReceiver<ConnCmd>,
    ) -> Result<(WsStream, LifecycleEvent), Interrupt> {
        let mut attempt = 0u32;
        loop {
            let delay = self.config.reconnect_delay(attempt);
            tracing::info!(
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting"
            );
            while_offline(tokio::time::sleep(delay), cmd_rx).await?;

            let session_token = self.shared.session_token();
            let attempt_result = while_offline(
                establish(&self.config, &self.shared, Some(session_token.as_str())),
                cmd_rx,
            )
            .await?;

            match attempt_result {
                Ok((ws, Handshake::Resumed)) => {
                    tracing::info!("session resumed");
                    return Ok((ws, LifecycleEvent::Resume));
                }
                Ok((ws, Handshake::Fresh(ready))) => {
                    tracing::info!(account = %ready.account.name, "new session after reconnect");
                    self.shared.set_session_token(ready.session_token);
                    return Ok((
                        ws,
                        LifecycleEvent::Connect {
                            account: ready.account,
                        },
                    ));
                }
                Err(LinkError::Authentication(reason)) => {
                    return Err(Interrupt::Dropped(reason));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// Drives `fut` while rejecting frames and watching for close requests.
async fn while_offline<F: Future>(
    fut: F,
    cmd_rx: &mut mpsc::UnboundedReceiver<ConnCmd>,
) -> Result<F::Output, Interrupt> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCmd::Frame { ack, .. }) => {
                    let _ = ack.send(Err(LinkError::NotConnected));
                }
                Some(ConnCmd::Close { code, reason, done }) => {
                    return Err(Interrupt::Close { code, reason, done });
                }
                None => return Err(Interrupt::Gone),
            },
        }
    }
}

/// Dials and handshakes, bounded by the configured timeout.
async fn establish(
    config: &ConnectorConfig,
    shared: &Shared,
    resume: Option<&str>,
) -> Result<(WsStream, Handshake)> {
    let attempt = dial_and_handshake(config, shared, resume);
    match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
            LinkError::Transport(format!("connect timed out after {}ms", limit.as_millis()))
        })?,
        None => attempt.await,
    }
}

async fn dial_and_handshake(
    config: &ConnectorConfig,
    shared: &Shared,
    resume: Option<&str>,
) -> Result<(WsStream, Handshake)> {
    let (mut ws, _response) = match tokio_tungstenite::connect_async(config.url.as_str()).await {
        Ok(pair) => pair,
        Err(tungstenite::Error::Http(response))
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            return Err(LinkError::Authentication(format!(
                "server refused the upgrade with status {}",
                response.status()
            )));
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(session_token) = resume {
        let payload = serde_json::to_value(ResumeSession {
            session_token: session_token.to_string(),
        })?;
        send_handshake(&mut ws, shared, RESUME, payload).await?;
        let reply = read_handshake_reply(&mut ws).await?;
        match reply.kind.as_str() {
            CONTINUE => return Ok((ws, Handshake::Resumed)),
            INVALID => tracing::info!("session expired, registering again"),
            other => {
                return Err(LinkError::Protocol(format!(
                    "unexpected {other} in reply to resume"
                )));
            }
        }
    }

    let token = shared
        .token()
        .ok_or_else(|| LinkError::Authentication("token not set".to_string()))?;
    let payload = serde_json::to_value(RegisterControl {
        token,
        agent: config.agent.clone(),
        version: config.version.clone(),
    })?;
    tracing::debug!(agent = %config.agent, "registering control");
    send_handshake(&mut ws, shared, REGISTER_CONTROL, payload).await?;

    let reply = read_handshake_reply(&mut ws).await?;
    match reply.kind.as_str() {
        READY => Ok((ws, Handshake::Fresh(reply.decode::<Ready>()?))),
        INVALID => {
            let invalid = reply.decode::<Invalid>().unwrap_or_default();
            Err(LinkError::Authentication(invalid.message))
        }
        other => Err(LinkError::Protocol(format!(
            "unexpected {other} in reply to {REGISTER_CONTROL}"
        ))),
    }
}

async fn send_handshake(
    ws: &mut WsStream,
    shared: &Shared,
    kind: &str,
    data: serde_json::Value,
) -> Result<()> {
    let text = Envelope::new(kind, data)
        .with_seq(shared.next_seq())
        .to_text()?;
    ws.send(Message::text(text)).await?;
    Ok(())
}

async fn read_handshake_reply(ws: &mut WsStream) -> Result<Envelope> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Envelope::from_text(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(LinkError::Transport(
                    "connection closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn connector() -> Connector {
        let mut config = ConnectorConfig::new("ws://127.0.0.1:9/unused");
        config.connect_timeout = Some(Duration::from_millis(200));
        Connector::new(config, Arc::new(|_: Envelope| {}))
    }

    #[test]
    fn reconnect_delay_is_bounded() {
        let mut config = ConnectorConfig::new("ws://localhost");
        config.initial_reconnect_delay = Duration::from_millis(500);
        config.max_reconnect_delay = Duration::from_secs(5);

        assert_eq!(config.reconnect_delay(0), Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(config.reconnect_delay(4), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(200), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn connect_without_token_is_rejected() {
        let connector = connector();
        let result = connector.connect().await;
        assert!(matches!(result, Err(LinkError::Authentication(_))));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dial_failure_is_transport_error() {
        let connector = connector();
        connector.set_token("secret");
        let result = connector.connect().await;
        assert!(matches!(result, Err(LinkError::Transport(_))));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let connector = connector();
        let result = connector
            .send_frame(Envelope::new("set_node_subscriptions", serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let connector = connector();
        connector.set_token("secret");
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        connector.on_lifecycle(Arc::new(move |event: &LifecycleEvent| {
            if *event == LifecycleEvent::Close {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        connector.close(1000, "done").await;
        connector.close(1000, "done").await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(connector.connect().await, Err(LinkError::Closed)));
    }
}
