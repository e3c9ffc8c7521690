//! Generic per-class subscription manager.
//!
//! Tracks which consumers want updates for which entities, keeps the server
//! informed of the union of that interest, and fans incoming update events
//! out to the interested handlers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::class::EntityClass;
use super::registry::{Handler, HandlerRegistry};
use crate::domain::{DesiredSubscriptionSet, Selector};
use crate::error::{LinkError, Result};
use crate::ws::Connection;

/// Subscription manager for entity class `K` over connection `C`.
pub struct SubscriptionManager<K: EntityClass, C: Connection> {
    connection: Arc<C>,
    registry: Mutex<HandlerRegistry<K::Event>>,
    _class: PhantomData<fn() -> K>,
}

impl<K: EntityClass, C: Connection> fmt::Debug for SubscriptionManager<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("class", &K::NAME)
            .field("registry", &*self.registry())
            .finish_non_exhaustive()
    }
}

impl<K: EntityClass, C: Connection> SubscriptionManager<K, C> {
    /// Creates a manager with an empty registry.
    #[must_use]
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            connection,
            registry: Mutex::new(HandlerRegistry::new(K::NAME)),
            _class: PhantomData,
        }
    }

    /// Registers `handler` for updates matching `selector`.
    ///
    /// If this is the first handler for `selector`, the server is sent the
    /// new desired subscription set before this returns. While offline the
    /// send is skipped; the next connect or resume resynchronizes.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidSelector`] if the class rejects `selector`; the
    ///   registry is not touched.
    /// - Transport or serialization errors from the resync.
    pub async fn register(&self, selector: Selector, handler: Handler<K::Event>) -> Result<()> {
        let selector = K::validate(selector)?;
        let first = self.registry().add(selector, handler);
        if first {
            tracing::debug!(class = K::NAME, %selector, "first handler registered");
            self.resync().await?;
        }
        Ok(())
    }

    /// Removes one registration of `handler` under `selector`.
    ///
    /// If that was the last handler for `selector`, the selector is dropped
    /// and the server is sent the reduced desired set.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoHandlers`] if `selector` has no handlers.
    /// - [`LinkError::HandlerNotFound`] if `handler` is not registered under
    ///   `selector`; the registry is left unchanged.
    /// - Transport or serialization errors from the resync.
    pub async fn unregister(&self, selector: Selector, handler: &Handler<K::Event>) -> Result<()> {
        let emptied = self.registry().remove(selector, handler)?;
        if emptied {
            tracing::debug!(class = K::NAME, %selector, "last handler removed");
            self.resync().await?;
        }
        Ok(())
    }

    /// Sends the full desired subscription set, derived fresh from the
    /// registry.
    ///
    /// Does nothing while offline.
    ///
    /// # Errors
    ///
    /// Transport and serialization errors. [`LinkError::NotConnected`] is
    /// swallowed.
    pub async fn resync(&self) -> Result<()> {
        if !self.connection.is_connected() {
            tracing::debug!(class = K::NAME, "offline, resync deferred");
            return Ok(());
        }
        let message = K::subscription_message(&self.desired())?;
        match self.connection.send(K::SUBSCRIPTION_KIND, message).await {
            Err(LinkError::NotConnected) => {
                tracing::debug!(class = K::NAME, "connection lost, resync deferred");
                Ok(())
            }
            other => other,
        }
    }

    /// Returns the desired subscription set for the current registry.
    #[must_use]
    pub fn desired(&self) -> DesiredSubscriptionSet {
        self.registry().desired()
    }

    /// Returns the number of handlers registered under `selector`.
    #[must_use]
    pub fn handler_count(&self, selector: Selector) -> usize {
        self.registry().handler_count(selector)
    }

    /// Invokes wildcard handlers, then handlers for the event's entity id.
    ///
    /// Handlers run on the calling task with the registry unlocked, so they
    /// may register or unregister. Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &K::Event) -> usize {
        let handlers = self.registry().handlers_for(K::target(event));
        for handler in &handlers {
            handler.call(event);
        }
        handlers.len()
    }

    /// Decodes an inbound update-event payload and dispatches it.
    pub fn handle_event(&self, data: Value) {
        match K::decode(data) {
            Ok(event) => {
                self.dispatch(&event);
            }
            Err(err) => {
                tracing::warn!(class = K::NAME, error = %err, "discarding malformed update event");
            }
        }
    }

    fn registry(&self) -> MutexGuard<'_, HandlerRegistry<K::Event>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
