//! Request/response and fire-and-forget messaging over the [`Connector`].
//!
//! [`Connection`] is the seam every higher component is generic over;
//! [`Link`] is the WebSocket-backed implementation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use super::connector::{Connector, ConnectorConfig};
use super::lifecycle::{ConnectionState, LifecycleEvent, LifecycleListener};
use super::messages::Envelope;
use crate::error::{LinkError, Result};

/// Handler for one inbound message kind; receives the frame's `data`.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Messaging surface shared by the control session and every manager.
pub trait Connection: Send + Sync + 'static {
    /// Returns `true` while messages may be sent.
    fn is_connected(&self) -> bool;

    /// Sends a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] while offline, or a transport
    /// error if the write fails.
    fn send(&self, kind: &str, data: Value) -> impl Future<Output = Result<()>> + Send;

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::SessionLost`] if the connection drops first and
    /// [`LinkError::Remote`] if the server answers with an error.
    fn request(&self, kind: &str, data: Value) -> impl Future<Output = Result<Value>> + Send;

    /// Registers the handler for inbound frames of exactly `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateHandler`] if `kind` already has one.
    fn set_handler(&self, kind: &str, handler: MessageHandler) -> Result<()>;

    /// Registers a lifecycle listener.
    fn on_lifecycle(&self, listener: LifecycleListener);

    /// Permanently closes the connection.
    fn close(&self, code: u16, reason: &str) -> impl Future<Output = ()> + Send;
}

/// Routes inbound frames to pending requests or per-kind handlers.
#[derive(Default)]
struct Router {
    handlers: Mutex<HashMap<String, MessageHandler>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
}

impl Router {
    fn route(&self, envelope: Envelope) {
        if let Some(seq) = envelope.response_to() {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&seq);
            if let Some(waiter) = waiter {
                let _ = waiter.send(envelope.into_response());
                return;
            }
        }

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.kind)
            .cloned();
        match handler {
            Some(handler) => handler(envelope.data),
            None => tracing::debug!(kind = %envelope.kind, "no handler for inbound message"),
        }
    }

    fn set_handler(&self, kind: &str, handler: MessageHandler) -> Result<()> {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(kind) {
            return Err(LinkError::DuplicateHandler(kind.to_string()));
        }
        handlers.insert(kind.to_string(), handler);
        Ok(())
    }

    fn add_pending(&self, seq: u64) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq, tx);
        rx
    }

    fn remove_pending(&self, seq: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq);
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing in-flight requests");
        }
        for (_, waiter) in drained {
            let _ = waiter.send(Err(LinkError::SessionLost));
        }
    }

    fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Releases a pending slot when the request future finishes or is dropped.
struct PendingGuard<'a> {
    router: &'a Router,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.router.remove_pending(self.seq);
    }
}

/// WebSocket-backed [`Connection`].
pub struct Link {
    connector: Connector,
    router: Arc<Router>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("connector", &self.connector)
            .field("pending", &self.router.pending_count())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Creates a disconnected link.
    #[must_use]
    pub fn new(config: ConnectorConfig) -> Self {
        let router = Arc::new(Router::default());
        let sink_router = Arc::clone(&router);
        let connector = Connector::new(
            config,
            Arc::new(move |envelope: Envelope| sink_router.route(envelope)),
        );

        let lifecycle_router = Arc::clone(&router);
        connector.on_lifecycle(Arc::new(move |event: &LifecycleEvent| {
            if matches!(event, LifecycleEvent::Drop | LifecycleEvent::Close) {
                lifecycle_router.fail_pending();
            }
        }));

        Self { connector, router }
    }

    /// Sets the access token used by the next handshake.
    pub fn set_token(&self, token: impl Into<String>) {
        self.connector.set_token(token);
    }

    /// Connects to the server.
    ///
    /// # Errors
    ///
    /// See [`Connector::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.connector.connect().await
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Waits until the connection reaches `target`.
    ///
    /// # Errors
    ///
    /// See [`Connector::wait_for_state`].
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        self.connector.wait_for_state(target).await
    }

    /// Returns the underlying connector.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }
}

impl Connection for Link {
    fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    async fn send(&self, kind: &str, data: Value) -> Result<()> {
        self.connector.send_frame(Envelope::new(kind, data)).await
    }

    async fn request(&self, kind: &str, data: Value) -> Result<Value> {
        let seq = self.connector.next_seq();
        let response = self.router.add_pending(seq);
        let _slot = PendingGuard {
            router: &self.router,
            seq,
        };
        self.connector
            .send_frame(Envelope::request(kind, data).with_seq(seq))
            .await?;
        response.await.map_err(|_| LinkError::SessionLost)?
    }

    fn set_handler(&self, kind: &str, handler: MessageHandler) -> Result<()> {
        self.router.set_handler(kind, handler)
    }

    fn on_lifecycle(&self, listener: LifecycleListener) {
        self.connector.on_lifecycle(listener);
    }

    async fn close(&self, code: u16, reason: &str) {
        self.connector.close(code, reason).await;
    }
}
