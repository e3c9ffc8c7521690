//! Entity payloads carried by inbound update events.
//!
//! Each update event carries the affected entity's id and its new state.
//! Log records are routed by their optional `instance_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current state of a worker node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    /// Node identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Agent string the node connected with.
    #[serde(default)]
    pub agent: String,
    /// Node software version.
    #[serde(default)]
    pub version: String,
    /// Whether the node currently holds a connection to the server.
    #[serde(default)]
    pub connected: bool,
}

/// Lifecycle status of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Not assigned to any node.
    Unassigned,
    /// Assigned but not running.
    Stopped,
    /// Start requested.
    Starting,
    /// Running.
    Running,
    /// Stop requested.
    Stopping,
    /// Creating a new save.
    CreatingSave,
    /// Exporting data.
    Exporting,
    /// Removed from the cluster.
    Deleted,
    /// Status string this client does not know.
    #[serde(other)]
    Unknown,
}

/// Current state of a managed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    /// Instance identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Node the instance is assigned to, if any.
    #[serde(default, alias = "assigned_slave")]
    pub assigned_node: Option<u64>,
    /// Lifecycle status.
    pub status: InstanceStatus,
}

/// One save file of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDetails {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub mtime_ms: DateTime<Utc>,
    /// Whether this save is currently loaded.
    #[serde(default)]
    pub loaded: bool,
    /// Whether this save is loaded by default on start.
    #[serde(default)]
    pub default: bool,
}

/// Full save list of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveListUpdate {
    /// Instance the list belongs to.
    pub instance_id: u64,
    /// All saves of the instance.
    #[serde(default)]
    pub list: Vec<SaveDetails>,
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log level name (e.g. `"info"`).
    pub level: String,
    /// Log message text.
    pub message: String,
    /// Instance that produced the record, used for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    /// Node that produced the record.
    #[serde(default, alias = "slave_id", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    /// Time the record was produced.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Wire shape of a log event: the record is nested under `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessageEvent {
    /// The log record.
    pub info: LogRecord,
}
