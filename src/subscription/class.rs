//! Entity classes: per-class validation rules and message kinds.
//!
//! One [`EntityClass`] implementation parameterizes the generic
//! [`super::SubscriptionManager`] for each kind of remote entity.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{
    DesiredSubscriptionSet, InstanceDetails, LogMessageEvent, LogRecord, NodeDetails,
    SaveListUpdate, Selector,
};
use crate::error::{LinkError, Result};
use crate::ws::messages::{SetLogSubscriptions, SetSubscriptions};

/// Rules and wire names for one class of subscribable entity.
pub trait EntityClass: Send + Sync + 'static {
    /// Payload passed to update handlers.
    type Event: DeserializeOwned + Send + Sync + 'static;

    /// Human-readable class name used in errors and logs.
    const NAME: &'static str;
    /// Inbound update-event message kind.
    const EVENT_KIND: &'static str;
    /// Outbound subscription-declaration message kind.
    const SUBSCRIPTION_KIND: &'static str;
    /// Whether the wildcard selector is accepted.
    const ALLOWS_WILDCARD: bool = true;

    /// Checks that `selector` is allowed for this class.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidSelector`] for a disallowed wildcard.
    fn validate(selector: Selector) -> Result<Selector> {
        if selector.is_all() && !Self::ALLOWS_WILDCARD {
            return Err(LinkError::InvalidSelector(format!(
                "{} subscriptions require an instance id",
                Self::NAME
            )));
        }
        Ok(selector)
    }

    /// Entity id an event is routed by, if any.
    fn target(event: &Self::Event) -> Option<u64>;

    /// Decodes an inbound event payload.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] if the payload does not match.
    fn decode(data: Value) -> Result<Self::Event> {
        Ok(serde_json::from_value(data)?)
    }

    /// Builds the subscription-declaration payload for `set`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] on serializer failure.
    fn subscription_message(set: &DesiredSubscriptionSet) -> Result<Value>;
}

/// Worker nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nodes;

impl EntityClass for Nodes {
    type Event = NodeDetails;

    const NAME: &'static str = "node";
    const EVENT_KIND: &'static str = "node_update_event";
    const SUBSCRIPTION_KIND: &'static str = "set_node_subscriptions";

    fn target(event: &NodeDetails) -> Option<u64> {
        Some(event.id)
    }

    fn subscription_message(set: &DesiredSubscriptionSet) -> Result<Value> {
        Ok(serde_json::to_value(SetSubscriptions {
            all: set.all,
            ids: set.id_list(),
        })?)
    }
}

/// Managed instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct Instances;

impl EntityClass for Instances {
    type Event = InstanceDetails;

    const NAME: &'static str = "instance";
    const EVENT_KIND: &'static str = "instance_update_event";
    const SUBSCRIPTION_KIND: &'static str = "set_instance_subscriptions";

    fn target(event: &InstanceDetails) -> Option<u64> {
        Some(event.id)
    }

    fn subscription_message(set: &DesiredSubscriptionSet) -> Result<Value> {
        Ok(serde_json::to_value(SetSubscriptions {
            all: set.all,
            ids: set.id_list(),
        })?)
    }
}

/// Save lists, scoped per instance id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveLists;

impl EntityClass for SaveLists {
    type Event = SaveListUpdate;

    const NAME: &'static str = "save list";
    const EVENT_KIND: &'static str = "save_list_update_event";
    const SUBSCRIPTION_KIND: &'static str = "set_save_list_subscriptions";
    const ALLOWS_WILDCARD: bool = false;

    fn target(event: &SaveListUpdate) -> Option<u64> {
        Some(event.instance_id)
    }

    fn subscription_message(set: &DesiredSubscriptionSet) -> Result<Value> {
        Ok(serde_json::to_value(SetSubscriptions {
            all: false,
            ids: set.id_list(),
        })?)
    }
}

/// Log records of individual instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceLogs;

impl EntityClass for InstanceLogs {
    type Event = LogRecord;

    const NAME: &'static str = "instance log";
    const EVENT_KIND: &'static str = "log_message_event";
    const SUBSCRIPTION_KIND: &'static str = "set_log_subscriptions";
    const ALLOWS_WILDCARD: bool = false;

    fn target(event: &LogRecord) -> Option<u64> {
        event.instance_id
    }

    fn decode(data: Value) -> Result<LogRecord> {
        let event: LogMessageEvent = serde_json::from_value(data)?;
        Ok(event.info)
    }

    fn subscription_message(set: &DesiredSubscriptionSet) -> Result<Value> {
        Ok(serde_json::to_value(SetLogSubscriptions {
            all: false,
            master: false,
            node_ids: Vec::new(),
            instance_ids: set.id_list(),
            max_level: None,
        })?)
    }
}
