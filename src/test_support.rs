//! In-memory [`Connection`] for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::error::{LinkError, Result};
use crate::ws::{Connection, LifecycleEvent, LifecycleListener, LifecycleListeners, MessageHandler};

/// Records sends and requests; lets tests fire lifecycle events and
/// inbound frames.
#[derive(Default)]
pub(crate) struct MockConnection {
    connected: AtomicBool,
    reject_sends: AtomicBool,
    sent: Mutex<Vec<(String, Value)>>,
    requests: Mutex<Vec<(String, Value)>>,
    request_error: Mutex<Option<fn() -> LinkError>>,
    closes: Mutex<Vec<(u16, String)>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
    listeners: LifecycleListeners,
    sent_notify: Notify,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("connected", &self.is_connected())
            .field("sent", &self.sent().len())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn connected() -> Arc<Self> {
        let conn = Self::new();
        conn.set_connected(true);
        conn
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes `send` fail with `NotConnected` while still reporting connected.
    pub(crate) fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Makes every later `request` fail with the produced error.
    pub(crate) fn fail_requests(&self, error: fn() -> LinkError) {
        *self
            .request_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Applies the state change implied by `event`, then notifies listeners.
    pub(crate) fn fire(&self, event: &LifecycleEvent) {
        self.set_connected(event.is_established());
        self.listeners.emit(event);
    }

    /// Delivers an inbound frame to the registered handler.
    pub(crate) fn deliver(&self, kind: &str, data: Value) -> bool {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned();
        match handler {
            Some(handler) => {
                handler(data);
                true
            }
            None => false,
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, Value)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, data)| data)
            .collect()
    }

    pub(crate) fn clear_sent(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn requests(&self) -> Vec<(String, Value)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn closes(&self) -> Vec<(u16, String)> {
        self.closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `count` frames have been sent.
    pub(crate) async fn wait_for_sends(&self, count: usize) -> bool {
        let wait = async {
            while self.sent().len() < count {
                self.sent_notify.notified().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .is_ok()
    }
}

impl Connection for MockConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, kind: &str, data: Value) -> Result<()> {
        if !self.is_connected() || self.reject_sends.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind.to_string(), data));
        self.sent_notify.notify_one();
        Ok(())
    }

    async fn request(&self, kind: &str, data: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind.to_string(), data));
        let error = *self
            .request_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match error {
            Some(make_error) => Err(make_error()),
            None => Ok(Value::Object(serde_json::Map::new())),
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

    fn on_lifecycle(&self, listener: LifecycleListener) {
        self.listeners.add(listener);
    }

    async fn close(&self, code: u16, reason: &str) {
        self.closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((code, reason.to_string()));
        self.fire(&LifecycleEvent::Close);
    }
}
