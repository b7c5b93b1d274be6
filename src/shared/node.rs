//! Canvas Node Types
//!
//! Nodes live in the `nodes` map of the shared document and are read here as
//! JSON values. Clients own most of their shape (position, size, styling), so the
//! server only reads and writes a handful of well-known fields inside the
//! node's `data` record. Everything else must round-trip untouched.
//!
//! ```json
//! {
//!   "id": "n1",
//!   "type": "image",
//!   "position": { "x": 10, "y": 20 },
//!   "data": { "status": "pending", "prompt": "cat", "taskId": null }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SharedError;

/// Field names used inside node entities
pub mod fields {
    pub const TYPE: &str = "type";
    pub const DATA: &str = "data";
    pub const POSITION: &str = "position";
    pub const STATUS: &str = "status";
    pub const SRC: &str = "src";
    pub const DESCRIPTION: &str = "description";
    pub const PROMPT: &str = "prompt";
    pub const ERROR: &str = "error";
    pub const TASK_ID: &str = "taskId";
    /// Older clients wrote the in-flight marker under this name
    pub const PENDING_TASK: &str = "pendingTask";
    pub const DESCRIPTION_RETRIES: &str = "descriptionRetries";
    pub const DESCRIPTION_ERROR: &str = "descriptionError";
}

/// Lifecycle status of a canvas node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Generating,
    Completed,
    /// Finalised by the user; never picked up again
    Fin,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Fin => "fin",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "fin" => Ok(Self::Fin),
            "failed" => Ok(Self::Failed),
            other => Err(SharedError::unknown_variant("node status", other)),
        }
    }
}

/// Read-only view over a node entity value
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    id: &'a str,
    entity: &'a Value,
}

impl<'a> NodeView<'a> {
    pub fn new(id: &'a str, entity: &'a Value) -> Self {
        Self { id, entity }
    }

    pub fn id(&self) -> &'a str {
        self.id
    }

    pub fn node_type(&self) -> Option<&'a str> {
        self.entity.get(fields::TYPE).and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&'a Map<String, Value>> {
        self.entity.get(fields::DATA).and_then(Value::as_object)
    }

    /// Unknown status strings read as `None` rather than failing the scan.
    pub fn status(&self) -> Option<NodeStatus> {
        self.data_str(fields::STATUS).and_then(|s| s.parse().ok())
    }

    /// The live work-item marker, if any.
    pub fn marker(&self) -> Option<&'a str> {
        self.data_str(fields::TASK_ID)
            .or_else(|| self.data_str(fields::PENDING_TASK))
    }

    pub fn src(&self) -> Option<&'a str> {
        self.data_str(fields::SRC)
    }

    pub fn description(&self) -> Option<&'a str> {
        self.data_str(fields::DESCRIPTION)
    }

    pub fn prompt(&self) -> Option<&'a str> {
        self.data_str(fields::PROMPT)
    }

    pub fn description_retries(&self) -> u32 {
        self.data()
            .and_then(|data| data.get(fields::DESCRIPTION_RETRIES))
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    /// Non-empty, non-whitespace string field from `data`.
    fn data_str(&self, key: &str) -> Option<&'a str> {
        self.data()
            .and_then(|data| data.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Merge `patch` into the entity's `data` record.
///
/// `Value::Null` entries in the patch remove the key. Fields outside `data`
/// are left alone.
pub fn merge_node_data(previous: &Value, patch: &Map<String, Value>) -> Value {
    let mut merged = match previous {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let mut data = merged
        .get(fields::DATA)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (key, value) in patch {
        if value.is_null() {
            data.remove(key);
        } else {
            data.insert(key.clone(), value.clone());
        }
    }
    merged.insert(fields::DATA.to_string(), Value::Object(data));

    Value::Object(merged)
}
