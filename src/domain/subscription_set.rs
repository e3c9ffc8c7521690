//! Desired subscription set derived from a handler registry.

use std::collections::BTreeSet;

use super::Selector;

/// Minimal description of current consumer interest for one entity class.
///
/// Never stored on its own: recomputed from the registry every time it is
/// needed so it cannot drift from the registered handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSubscriptionSet {
    /// `true` iff the wildcard selector has at least one handler.
    pub all: bool,
    /// Concrete ids with at least one handler, ascending.
    pub ids: BTreeSet<u64>,
}

impl DesiredSubscriptionSet {
    /// Builds a set from the selectors that currently have handlers.
    #[must_use]
    pub fn from_selectors<'a>(selectors: impl IntoIterator<Item = &'a Selector>) -> Self {
        let mut set = Self::default();
        for selector in selectors {
            match selector {
                Selector::All => set.all = true,
                Selector::Id(id) => {
                    set.ids.insert(*id);
                }
            }
        }
        set
    }

    /// Returns the ids as a vector, ascending.
    #[must_use]
    pub fn id_list(&self) -> Vec<u64> {
        self.ids.iter().copied().collect()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all && self.ids.is_empty()
    }
}
