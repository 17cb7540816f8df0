//! Normalized change events and their wire encoding.
//!
//! Subscribers receive one JSON text message per event:
//!
//! ```text
//! {"event":"ADDED","pod":"web-0","namespace":"default"}
//! ```
//!
//! The field names and the `event` value set are part of the subscriber
//! contract and must not change.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Added => "ADDED",
            EventKind::Updated => "UPDATED",
            EventKind::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single add/update/delete notification about a pod.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(rename = "pod")]
    pub name: String,
    pub namespace: String,
}

impl ResourceEvent {
    pub fn new(kind: EventKind, meta: ResourceMeta) -> Self {
        Self {
            kind,
            name: meta.name,
            namespace: meta.namespace,
        }
    }

    pub fn encode(&self) -> Result<WireMessage> {
        Ok(WireMessage::from(serde_json::to_string(self)?))
    }
}

/// Identity fields pulled out of a raw upstream object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    pub name: String,
    pub namespace: String,
}

impl ResourceMeta {
    /// Reads `metadata.name` and `metadata.namespace` from a Kubernetes object.
    pub fn extract(object: &Value) -> Result<Self> {
        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or(Error::MalformedResource("missing metadata"))?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(Error::MalformedResource("missing metadata.name"))?;
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .ok_or(Error::MalformedResource("missing metadata.namespace"))?;
        Ok(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// Serialized event, shared by every delivery of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage(Arc<str>);

impl WireMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WireMessage {
    fn from(value: String) -> Self {
        WireMessage(Arc::from(value))
    }
}

impl From<&str> for WireMessage {
    fn from(value: &str) -> Self {
        WireMessage(Arc::from(value))
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
