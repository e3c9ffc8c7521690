//! Subscription layer: handler registries and the generic manager.
//!
//! Each [`EntityClass`] names one kind of remote entity together with its
//! selector rules and wire message kinds. A [`SubscriptionManager`] per
//! class keeps the server's subscription table in step with local interest.

pub mod class;
pub mod manager;
pub mod registry;

pub use class::{EntityClass, InstanceLogs, Instances, Nodes, SaveLists};
pub use manager::SubscriptionManager;
pub use registry::{Handler, HandlerRegistry};
