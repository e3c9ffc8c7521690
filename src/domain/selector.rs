//! Subscription selector.
//!
//! A [`Selector`] names either one concrete entity or every entity of a
//! class. Wildcard and explicit ids are independent registry keys; their
//! handlers are unioned at dispatch time.

use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// Key under which update handlers are registered.
///
/// Ordering places [`Selector::All`] before every id so that an ordered
/// registry iterates the wildcard first and ids ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    /// Every entity of the class.
    All,
    /// One entity by its numeric id.
    Id(u64),
}

impl Selector {
    /// Returns `true` for the wildcard selector.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// `"*"` is the wildcard; anything else must be a non-negative integer.
impl FromStr for Selector {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::All);
        }
        s.parse::<u64>()
            .map(Self::Id)
            .map_err(|_| LinkError::InvalidSelector(format!("{s:?} is not an id or \"*\"")))
    }
}
