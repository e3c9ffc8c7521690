//! Connection state and lifecycle notifications.
//!
//! Listeners are invoked synchronously, in registration order, on the task
//! that observed the transition. A listener that needs to do async work
//! spawns it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::messages::Account;

/// Physical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket, no reconnect pending.
    Disconnected,
    /// Dialing or handshaking (initial connect or reconnect after a drop).
    Connecting,
    /// Session established; messages may be sent.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Lifecycle transitions visible to upper layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Fresh session established.
    Connect {
        /// Account the server authenticated the session as.
        account: Account,
    },
    /// Transport lost; an automatic reconnect follows.
    Drop,
    /// Reconnect succeeded and the session continues.
    Resume,
    /// Connection intentionally and permanently terminated.
    Close,
}

impl LifecycleEvent {
    /// Returns the event name (`"connect"`, `"drop"`, `"resume"`, `"close"`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Drop => "drop",
            Self::Resume => "resume",
            Self::Close => "close",
        }
    }

    /// Returns `true` for transitions into the connected state.
    #[must_use]
    pub const fn is_established(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Resume)
    }
}

/// Callback invoked for every lifecycle event.
pub type LifecycleListener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Ordered list of lifecycle listeners.
#[derive(Default)]
pub struct LifecycleListeners {
    listeners: Mutex<Vec<LifecycleListener>>,
}

impl fmt::Debug for LifecycleListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleListeners")
            .field("count", &self.len())
            .finish()
    }
}

impl LifecycleListeners {
    /// Creates an empty listener list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn add(&self, listener: LifecycleListener) {
        self.lock().push(listener);
    }

    /// Invokes every listener in registration order.
    ///
    /// The list is snapshotted first so listeners may register further
    /// listeners without deadlocking; those only see later events.
    pub fn emit(&self, event: &LifecycleEvent) {
        tracing::debug!(event = event.name(), "lifecycle event");
        let snapshot: Vec<LifecycleListener> = self.lock().clone();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LifecycleListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners = LifecycleListeners::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |event: &LifecycleEvent| {
                if let Ok(mut seen) = seen.lock() {
                    seen.push(format!("{tag}:{}", event.name()));
                }
            }));
        }

        listeners.emit(&LifecycleEvent::Drop);
        listeners.emit(&LifecycleEvent::Resume);

        let Ok(seen) = seen.lock() else {
            panic!("lock poisoned");
        };
        assert_eq!(
            *seen,
            vec![
                "first:drop",
                "second:drop",
                "third:drop",
                "first:resume",
                "second:resume",
                "third:resume",
            ]
        );
    }

    #[test]
    fn listener_may_register_another() {
        let listeners = Arc::new(LifecycleListeners::new());
        let inner = Arc::clone(&listeners);
        listeners.add(Arc::new(move |_: &LifecycleEvent| {
            inner.add(Arc::new(|_: &LifecycleEvent| {}));
        }));
        listeners.emit(&LifecycleEvent::Close);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn established_events() {
        assert!(
            LifecycleEvent::Connect {
                account: Account::default()
            }
            .is_established()
        );
        assert!(LifecycleEvent::Resume.is_established());
        assert!(!LifecycleEvent::Drop.is_established());
        assert!(!LifecycleEvent::Close.is_established());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
