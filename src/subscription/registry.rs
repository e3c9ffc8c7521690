//! Ordered handler storage keyed by selector.
//!
//! [`HandlerRegistry`] maps each [`Selector`] to the callbacks registered
//! under it, in insertion order. A selector whose last handler is removed is
//! deleted from the map immediately, so the key set is exactly the set of
//! selectors with live handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::{DesiredSubscriptionSet, Selector};
use crate::error::{LinkError, Result};

/// Update callback for entities of type `E`.
///
/// Identity is by reference: clones of one `Handler` are the same handler,
/// while two handlers built from identical closures are distinct. Keep a
/// clone around to unregister later.
pub struct Handler<E>(Arc<dyn Fn(&E) + Send + Sync>);

impl<E> Handler<E> {
    /// Wraps a callback.
    pub fn new(callback: impl Fn(&E) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Invokes the callback.
    pub fn call(&self, event: &E) {
        (self.0)(event);
    }

    /// Returns `true` if both values refer to the same callback.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E> fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// Selector → ordered handlers for one entity class.
pub struct HandlerRegistry<E> {
    class: &'static str,
    entries: BTreeMap<Selector, Vec<Handler<E>>>,
}

impl<E> fmt::Debug for HandlerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<String, usize> = self
            .entries
            .iter()
            .map(|(selector, handlers)| (selector.to_string(), handlers.len()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("class", &self.class)
            .field("entries", &counts)
            .finish()
    }
}

impl<E> HandlerRegistry<E> {
    /// Creates an empty registry for the named entity class.
    #[must_use]
    pub fn new(class: &'static str) -> Self {
        Self {
            class,
            entries: BTreeMap::new(),
        }
    }

    /// Appends `handler` under `selector`.
    ///
    /// Duplicates are appended, not merged. Returns `true` if the selector
    /// went from zero to one handler.
    pub fn add(&mut self, selector: Selector, handler: Handler<E>) -> bool {
        let handlers = self.entries.entry(selector).or_default();
        handlers.push(handler);
        handlers.len() == 1
    }

    /// Removes one occurrence of `handler` (the last one) from `selector`.
    ///
    /// Returns `true` if the selector lost its last handler and was removed.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoHandlers`] if `selector` has no entry.
    /// - [`LinkError::HandlerNotFound`] if `handler` is not registered under
    ///   it; the registry is left unchanged.
    pub fn remove(&mut self, selector: Selector, handler: &Handler<E>) -> Result<bool> {
        let Some(handlers) = self.entries.get_mut(&selector) else {
            return Err(LinkError::NoHandlers {
                class: self.class,
                selector,
            });
        };
        let Some(index) = handlers.iter().rposition(|h| h.same(handler)) else {
            return Err(LinkError::HandlerNotFound {
                class: self.class,
                selector,
            });
        };
        handlers.remove(index);
        if handlers.is_empty() {
            self.entries.remove(&selector);
            return Ok(true);
        }
        Ok(false)
    }

    /// Derives the desired subscription set from the current keys.
    #[must_use]
    pub fn desired(&self) -> DesiredSubscriptionSet {
        DesiredSubscriptionSet::from_selectors(self.entries.keys())
    }

    /// Returns the handlers interested in an event for `target`: wildcard
    /// handlers first, then handlers for the concrete id.
    #[must_use]
    pub fn handlers_for(&self, target: Option<u64>) -> Vec<Handler<E>> {
        let wildcard = self.entries.get(&Selector::All).into_iter().flatten();
        let specific = target
            .and_then(|id| self.entries.get(&Selector::Id(id)))
            .into_iter()
            .flatten();
        wildcard.chain(specific).cloned().collect()
    }

    /// Returns the number of handlers registered under `selector`.
    #[must_use]
    pub fn handler_count(&self, selector: Selector) -> usize {
        self.entries.get(&selector).map_or(0, Vec::len)
    }

    /// Returns `true` if `selector` has at least one handler.
    #[must_use]
    pub fn contains(&self, selector: Selector) -> bool {
        self.entries.contains_key(&selector)
    }

    /// Returns the number of selectors with handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
