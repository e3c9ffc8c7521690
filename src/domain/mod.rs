//! Domain layer: selectors, desired subscription sets, and entity payloads.
//!
//! These types are shared by the subscription managers, the wire layer,
//! and consumers that receive update callbacks.

pub mod entity;
pub mod selector;
pub mod subscription_set;

pub use entity::{
    InstanceDetails, InstanceStatus, LogMessageEvent, LogRecord, NodeDetails, SaveDetails,
    SaveListUpdate,
};
pub use selector::Selector;
pub use subscription_set::DesiredSubscriptionSet;
