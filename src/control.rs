//! Control session: the long-lived owner of every subscription manager.
//!
//! [`Control`] wires the four managers to one shared [`Connection`],
//! routes inbound update events to them, and resynchronizes all of them
//! whenever a session is (re-)established.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

use crate::error::{LinkError, Result};
use crate::subscription::{
    EntityClass, InstanceLogs, Instances, Nodes, SaveLists, SubscriptionManager,
};
use crate::ws::messages::{DEBUG_WS_MESSAGE_EVENT, DebugWsMessage, PREPARE_DISCONNECT};
use crate::ws::{Connection, LifecycleEvent, LifecycleListener, LifecycleListeners};

/// WebSocket close code sent by [`Control::shutdown`].
pub const CLOSE_NORMAL: u16 = 1000;
/// Close reason sent by [`Control::shutdown`].
pub const QUIT_REASON: &str = "Control Quit";

struct Inner<C: Connection> {
    connection: Arc<C>,
    nodes: SubscriptionManager<Nodes, C>,
    instances: SubscriptionManager<Instances, C>,
    save_lists: SubscriptionManager<SaveLists, C>,
    instance_logs: SubscriptionManager<InstanceLogs, C>,
    account_name: Mutex<Option<String>>,
    observers: LifecycleListeners,
}

impl<C: Connection> Inner<C> {
    fn on_lifecycle(self: &Arc<Self>, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Connect { account } => {
                *self.account() = Some(account.name.clone());
            }
            LifecycleEvent::Close => {
                *self.account() = None;
            }
            LifecycleEvent::Drop | LifecycleEvent::Resume => {}
        }

        if event.is_established() {
            self.spawn_resync(event.name());
        }
        self.observers.emit(event);
    }

    fn spawn_resync(self: &Arc<Self>, trigger: &'static str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(trigger, "no runtime available, resync skipped");
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(err) = inner.resync_all().await {
                tracing::warn!(trigger, error = %err, "resync after lifecycle event failed");
            }
        });
    }

    async fn resync_all(&self) -> Result<()> {
        let (nodes, instances, save_lists, logs) = tokio::join!(
            self.nodes.resync(),
            self.instances.resync(),
            self.save_lists.resync(),
            self.instance_logs.resync(),
        );
        let mut first_error = None;
        for (class, result) in [
            (Nodes::NAME, nodes),
            (Instances::NAME, instances),
            (SaveLists::NAME, save_lists),
            (InstanceLogs::NAME, logs),
        ] {
            if let Err(err) = result {
                tracing::warn!(class, error = %err, "resync failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn account(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.account_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Session object shared by every consumer of one server connection.
///
/// Cloning is cheap; clones share the same managers.
pub struct Control<C: Connection> {
    inner: Arc<Inner<C>>,
}

impl<C: Connection> Clone for Control<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> fmt::Debug for Control<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("connected", &self.inner.connection.is_connected())
            .field("account_name", &self.account_name())
            .field("nodes", &self.inner.nodes)
            .field("instances", &self.inner.instances)
            .field("save_lists", &self.inner.save_lists)
            .field("instance_logs", &self.inner.instance_logs)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Control<C> {
    /// Builds the managers on top of `connection` and claims the inbound
    /// event kinds they consume.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateHandler`] if another component already
    /// handles one of the event kinds on this connection.
    pub fn new(connection: Arc<C>) -> Result<Self> {
        let inner = Arc::new(Inner {
            nodes: SubscriptionManager::new(Arc::clone(&connection)),
            instances: SubscriptionManager::new(Arc::clone(&connection)),
            save_lists: SubscriptionManager::new(Arc::clone(&connection)),
            instance_logs: SubscriptionManager::new(Arc::clone(&connection)),
            account_name: Mutex::new(None),
            observers: LifecycleListeners::new(),
            connection,
        });

        route_events::<Nodes, C>(&inner, |inner| &inner.nodes)?;
        route_events::<Instances, C>(&inner, |inner| &inner.instances)?;
        route_events::<SaveLists, C>(&inner, |inner| &inner.save_lists)?;
        route_events::<InstanceLogs, C>(&inner, |inner| &inner.instance_logs)?;

        inner.connection.set_handler(
            DEBUG_WS_MESSAGE_EVENT,
            Arc::new(|data: Value| match serde_json::from_value::<DebugWsMessage>(data) {
                Ok(msg) => tracing::debug!(direction = %msg.direction, content = %msg.content, "ws debug"),
                Err(err) => tracing::debug!(error = %err, "malformed ws debug message"),
            }),
        )?;

        let weak = Arc::downgrade(&inner);
        inner
            .connection
            .on_lifecycle(Arc::new(move |event: &LifecycleEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_lifecycle(event);
                }
            }));

        Ok(Self { inner })
    }

    /// Worker node subscriptions.
    #[must_use]
    pub fn nodes(&self) -> &SubscriptionManager<Nodes, C> {
        &self.inner.nodes
    }

    /// Instance subscriptions.
    #[must_use]
    pub fn instances(&self) -> &SubscriptionManager<Instances, C> {
        &self.inner.instances
    }

    /// Per-instance save list subscriptions.
    #[must_use]
    pub fn save_lists(&self) -> &SubscriptionManager<SaveLists, C> {
        &self.inner.save_lists
    }

    /// Per-instance log subscriptions.
    #[must_use]
    pub fn instance_logs(&self) -> &SubscriptionManager<InstanceLogs, C> {
        &self.inner.instance_logs
    }

    /// The shared connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.inner.connection
    }

    /// Account name reported by the server on the last `connect`; `None`
    /// before the first connect and after close.
    #[must_use]
    pub fn account_name(&self) -> Option<String> {
        self.inner.account().clone()
    }

    /// Registers an observer for connect, drop, resume, and close.
    ///
    /// Observers run after the session has updated its own state, so
    /// [`Control::account_name`] is current inside the callback.
    pub fn on_connection_event(&self, listener: LifecycleListener) {
        self.inner.observers.add(listener);
    }

    /// Sends every manager's desired subscription set.
    ///
    /// Runs automatically on connect and resume.
    ///
    /// # Errors
    ///
    /// Returns the first resync failure after all four were attempted.
    pub async fn resync_all(&self) -> Result<()> {
        self.inner.resync_all().await
    }

    /// Issues an ad-hoc request over the shared connection.
    ///
    /// # Errors
    ///
    /// See [`Connection::request`].
    pub async fn request(&self, kind: &str, data: Value) -> Result<Value> {
        self.inner.connection.request(kind, data).await
    }

    /// Announces the disconnect to the server, then closes the connection.
    ///
    /// The connection is closed even if the announcement fails. Losing the
    /// session or being offline at that point counts as success.
    ///
    /// # Errors
    ///
    /// Any other failure of the `prepare_disconnect` request.
    pub async fn shutdown(&self) -> Result<()> {
        let prepared = self
            .inner
            .connection
            .request(PREPARE_DISCONNECT, Value::Object(serde_json::Map::new()))
            .await;
        self.inner.connection.close(CLOSE_NORMAL, QUIT_REASON).await;
        match prepared {
            Ok(_) | Err(LinkError::SessionLost | LinkError::NotConnected) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Claims `K::EVENT_KIND` on the connection and forwards it to the manager
/// selected by `pick`.
fn route_events<K: EntityClass, C: Connection>(
    inner: &Arc<Inner<C>>,
    pick: fn(&Inner<C>) -> &SubscriptionManager<K, C>,
) -> Result<()> {
    let weak: Weak<Inner<C>> = Arc::downgrade(inner);
    inner.connection.set_handler(
        K::EVENT_KIND,
        Arc::new(move |data: Value| {
            if let Some(inner) = weak.upgrade() {
                pick(&inner).handle_event(data);
            }
        }),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{InstanceDetails, LogRecord, NodeDetails, Selector};
    use crate::subscription::Handler;
    use crate::test_support::MockConnection;
    use crate::ws::Account;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn control(conn: &Arc<MockConnection>) -> Control<MockConnection> {
        let Ok(control) = Control::new(Arc::clone(conn)) else {
            panic!("fresh connection accepts handlers");
        };
        control
    }

    fn connect_event(name: &str) -> LifecycleEvent {
        LifecycleEvent::Connect {
            account: Account {
                name: name.to_string(),
            },
        }
    }

    const SUBSCRIPTION_KINDS: [&str; 4] = [
        "set_node_subscriptions",
        "set_instance_subscriptions",
        "set_save_list_subscriptions",
        "set_log_subscriptions",
    ];

    #[tokio::test]
    async fn every_manager_resends_on_resume() {
        let conn = MockConnection::new();
        let control = control(&conn);
        assert_ok!(
            control
                .instances()
                .register(Selector::All, Handler::new(|_: &InstanceDetails| {}))
                .await
        );
        assert!(conn.sent().is_empty());

        conn.fire(&LifecycleEvent::Resume);
        assert!(conn.wait_for_sends(4).await);
        let kinds: BTreeSet<String> = conn.sent().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds.len(), 4);
        for kind in SUBSCRIPTION_KINDS {
            assert!(kinds.contains(kind), "missing {kind}");
        }
        assert_eq!(
            conn.sent_of("set_instance_subscriptions"),
            vec![json!({"all": true, "ids": []})]
        );

        conn.fire(&LifecycleEvent::Drop);
        conn.clear_sent();
        conn.fire(&LifecycleEvent::Resume);
        assert!(conn.wait_for_sends(4).await);
        assert_eq!(conn.sent().len(), 4);
    }

    #[tokio::test]
    async fn account_name_follows_connect_and_close() {
        let conn = MockConnection::new();
        let control = control(&conn);
        assert_eq!(control.account_name(), None);

        conn.fire(&connect_event("admin"));
        assert_eq!(control.account_name().as_deref(), Some("admin"));

        conn.fire(&LifecycleEvent::Drop);
        assert_eq!(control.account_name().as_deref(), Some("admin"));

        conn.fire(&LifecycleEvent::Close);
        assert_eq!(control.account_name(), None);
    }

    #[tokio::test]
    async fn observers_see_updated_state() {
        let conn = MockConnection::new();
        let control = control(&conn);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let observed = Arc::clone(&seen);
        let session = control.clone();
        control.on_connection_event(Arc::new(move |event: &LifecycleEvent| {
            if let Ok(mut seen) = observed.lock() {
                seen.push((event.name(), session.account_name()));
            }
        }));

        conn.fire(&connect_event("ops"));
        conn.fire(&LifecycleEvent::Close);

        let Ok(seen) = seen.lock() else {
            panic!("lock poisoned");
        };
        assert_eq!(
            *seen,
            vec![
                ("connect", Some("ops".to_string())),
                ("close", None),
            ]
        );
    }

    #[tokio::test]
    async fn inbound_events_reach_their_manager() {
        let conn = MockConnection::connected();
        let control = control(&conn);
        let nodes = Arc::new(AtomicUsize::new(0));
        let logs = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&nodes);
        assert_ok!(
            control
                .nodes()
                .register(
                    Selector::Id(3),
                    Handler::new(move |_: &NodeDetails| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .await
        );
        let lines = Arc::clone(&logs);
        assert_ok!(
            control
                .instance_logs()
                .register(
                    Selector::Id(8),
                    Handler::new(move |record: &LogRecord| {
                        if let Ok(mut lines) = lines.lock() {
                            lines.push(record.message.clone());
                        }
                    }),
                )
                .await
        );

        let node = json!({"id": 3, "name": "alpha", "agent": "node", "version": "1.0", "connected": true});
        assert!(conn.deliver("node_update_event", node));
        assert!(conn.deliver(
            "node_update_event",
            json!({"id": 4, "name": "beta", "agent": "node", "version": "1.0", "connected": false})
        ));
        assert!(conn.deliver(
            "log_message_event",
            json!({"info": {"level": "info", "message": "world loaded", "instance_id": 8}})
        ));
        assert!(conn.deliver(
            "log_message_event",
            json!({"info": {"level": "info", "message": "other", "instance_id": 9}})
        ));
        assert!(conn.deliver(
            "debug_ws_message_event",
            json!({"direction": "in", "content": {"type": "ping"}})
        ));

        assert_eq!(nodes.load(Ordering::SeqCst), 1);
        let Ok(logs) = logs.lock() else {
            panic!("lock poisoned");
        };
        assert_eq!(*logs, vec!["world loaded".to_string()]);
    }

    #[tokio::test]
    async fn second_control_on_same_connection_is_rejected() {
        let conn = MockConnection::new();
        let _first = control(&conn);
        let err = assert_err!(Control::new(Arc::clone(&conn)));
        assert!(matches!(err, LinkError::DuplicateHandler(_)));
    }

    #[tokio::test]
    async fn shutdown_treats_session_lost_as_clean() {
        let conn = MockConnection::connected();
        let control = control(&conn);
        conn.fire(&connect_event("admin"));
        conn.fail_requests(|| LinkError::SessionLost);

        assert_ok!(control.shutdown().await);
        let requests = conn.requests();
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests.first(), Some((kind, _)) if kind == PREPARE_DISCONNECT));
        assert_eq!(conn.closes(), vec![(CLOSE_NORMAL, QUIT_REASON.to_string())]);
        assert_eq!(control.account_name(), None);
    }

    #[tokio::test]
    async fn shutdown_while_offline_still_closes() {
        let conn = MockConnection::new();
        let control = control(&conn);

        assert_ok!(control.shutdown().await);
        assert!(conn.requests().is_empty());
        assert_eq!(conn.closes().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_surfaces_remote_errors_after_closing() {
        let conn = MockConnection::connected();
        let control = control(&conn);
        conn.fail_requests(|| LinkError::Remote("busy".to_string()));

        let err = assert_err!(control.shutdown().await);
        assert!(matches!(err, LinkError::Remote(message) if message == "busy"));
        assert_eq!(conn.closes().len(), 1);
    }

    #[tokio::test]
    async fn connect_resync_failures_are_not_fatal() {
        let conn = MockConnection::new();
        let control = control(&conn);
        conn.reject_sends(true);

        conn.fire(&connect_event("admin"));
        assert_ok!(control.resync_all().await);
        assert!(conn.sent().is_empty());
        assert_eq!(control.account_name().as_deref(), Some("admin"));
    }
}
