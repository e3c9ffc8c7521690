//! WebSocket layer: wire messages, connection lifecycle, and the link.
//!
//! The [`Connector`] owns the single socket and its reconnect loop; the
//! [`Link`] adds request correlation and per-kind dispatch on top and is
//! exposed to the rest of the crate through the [`Connection`] trait.

pub mod connector;
pub mod lifecycle;
pub mod link;
pub mod messages;

pub use connector::{Connector, ConnectorConfig, FrameSink};
pub use lifecycle::{ConnectionState, LifecycleEvent, LifecycleListener, LifecycleListeners};
pub use link::{Connection, Link, MessageHandler};
pub use messages::{Account, Envelope};
