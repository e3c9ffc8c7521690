//! # cluster-control
//!
//! Client-side subscription synchronization for a cluster control server.
//!
//! Many independent consumers register interest in remote entities (worker
//! nodes, instances, per-instance save lists and logs). The crate folds that
//! interest into one minimal subscription set per entity class, keeps the
//! server's subscription tables in step over a single reconnecting
//! WebSocket, and fans update events back out to exactly the consumers who
//! asked for them.
//!
//! ## Architecture
//!
//! ```text
//! Consumers (register / unregister, callbacks)
//!     │
//!     ├── Control (control.rs)
//!     │     ├── SubscriptionManager<Nodes>        ┐
//!     │     ├── SubscriptionManager<Instances>    │ subscription/
//!     │     ├── SubscriptionManager<SaveLists>    │
//!     │     └── SubscriptionManager<InstanceLogs> ┘
//!     │
//!     ├── Connection trait ── Link (ws/link.rs)
//!     │                         └── Connector (ws/connector.rs)
//!     │
//!     └── Server (WebSocket, JSON envelopes)
//! ```

pub mod config;
pub mod control;
pub mod domain;
pub mod error;
pub mod subscription;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, ControlConfig};
pub use control::Control;
pub use domain::Selector;
pub use error::{LinkError, Result};
pub use subscription::{Handler, SubscriptionManager};
pub use ws::{Connection, ConnectionState, LifecycleEvent, Link};
