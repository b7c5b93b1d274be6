/**
 * Canvas CRDT Document
 *
 * This module wraps a Loro document holding one canvas. The server treats
 * the CRDT as an opaque merge engine: it imports client updates, exports
 * snapshots and deltas keyed by version vector, and reads/writes node
 * entities inside the top-level `nodes` map.
 *
 * Node entities are nested maps, so a server patch to `data.status` and a
 * concurrent client move of `position.x` touch different registers and
 * both survive the merge. Entities a client wrote as one plain value are
 * converted to nested maps the first time the server patches them.
 *
 * # Containers
 *
 * - `nodes` - node entities keyed by node id
 * - `edges` - edge entities keyed by edge id (client-owned)
 * - `tasks` - task ledger entries keyed by task id (broadcast visibility)
 */

use loro::{Container, ExportMode, LoroDoc, LoroMap, LoroValue, ValueOrContainer, VersionVector};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::shared::node::{fields, merge_node_data};

pub const NODES: &str = "nodes";
pub const EDGES: &str = "edges";
pub const TASKS: &str = "tasks";

/// Errors raised by the CRDT layer
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to import update: {0}")]
    Import(String),
    #[error("failed to export document: {0}")]
    Export(String),
    #[error("failed to mutate document: {0}")]
    Mutation(String),
}

/// One canvas document
pub struct CanvasDocument {
    doc: LoroDoc,
}

impl std::fmt::Debug for CanvasDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasDocument")
            .field("version", &self.version_tag())
            .finish()
    }
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Reconstruct a document from a persisted snapshot
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, DocumentError> {
        let document = Self::new();
        document.import(bytes)?;
        Ok(document)
    }

    /// Merge a snapshot or incremental update into the document
    pub fn import(&self, update: &[u8]) -> Result<(), DocumentError> {
        self.doc
            .import(update)
            .map(|_| ())
            .map_err(|e| DocumentError::Import(e.to_string()))
    }

    /// Full snapshot export, suitable for initialising a fresh peer
    pub fn export_snapshot(&self) -> Result<Vec<u8>, DocumentError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Export(e.to_string()))
    }

    /// Everything merged since `from`
    pub fn export_since(&self, from: &VersionVector) -> Result<Vec<u8>, DocumentError> {
        self.doc
            .export(ExportMode::updates(from))
            .map_err(|e| DocumentError::Export(e.to_string()))
    }

    /// Current version vector
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    /// Hex encoding of the current version vector, stored next to snapshots
    pub fn version_tag(&self) -> String {
        self.version()
            .encode()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// All node entities, ordered by id
    pub fn nodes(&self) -> Vec<(String, Value)> {
        let mut nodes: Vec<(String, Value)> = match loro_to_json(&self.doc.get_map(NODES).get_deep_value()) {
            Value::Object(map) => map.into_iter().collect(),
            _ => Vec::new(),
        };
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }

    /// One node entity
    pub fn node(&self, node_id: &str) -> Option<Value> {
        match loro_to_json(&self.doc.get_map(NODES).get_deep_value()) {
            Value::Object(mut map) => map.remove(node_id),
            _ => None,
        }
    }

    /// One task ledger entry
    pub fn task_entry(&self, task_id: &str) -> Option<Value> {
        match loro_to_json(&self.doc.get_map(TASKS).get_deep_value()) {
            Value::Object(mut map) => map.remove(task_id),
            _ => None,
        }
    }

    /// Whole document as JSON, for inspection and comparisons
    pub fn to_json(&self) -> Value {
        loro_to_json(&self.doc.get_deep_value())
    }

    /// Write a complete node entity.
    ///
    /// Existing nested maps are updated in place; keys absent from `entity`
    /// are deleted.
    pub fn put_node(&self, node_id: &str, entity: &Value) -> Result<(), DocumentError> {
        let Value::Object(fields) = entity else {
            return Err(DocumentError::Mutation(format!(
                "node '{}' must be an object",
                node_id
            )));
        };
        let nodes = self.doc.get_map(NODES);
        let node = ensure_child_map(&nodes, node_id)?;
        write_object(&node, fields, true)?;
        self.doc.commit();
        Ok(())
    }

    /// Merge `patch` into a node's `data` record.
    ///
    /// Only the patched keys are written; `Value::Null` deletes the key.
    /// Returns the merged entity, or `None` when the node does not exist.
    pub fn update_node_data(
        &self,
        node_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<Option<Value>, DocumentError> {
        let Some(previous) = self.node(node_id) else {
            return Ok(None);
        };
        let nodes = self.doc.get_map(NODES);

        let Some(node) = child_map(&nodes, node_id) else {
            // Plain-value entity: one conversion to nested maps
            tracing::debug!("[CRDT] Converting plain node '{}' to nested maps", node_id);
            let merged = merge_node_data(&previous, patch);
            self.put_node(node_id, &merged)?;
            return Ok(Some(merged));
        };

        let data = match child_map(&node, fields::DATA) {
            Some(data) => data,
            None => {
                let existing = previous
                    .get(fields::DATA)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = node
                    .insert_container(fields::DATA, LoroMap::new())
                    .map_err(mutation_error)?;
                write_object(&data, &existing, false)?;
                data
            }
        };

        for (key, value) in patch {
            if value.is_null() {
                if data.get(key).is_some() {
                    data.delete(key).map_err(mutation_error)?;
                }
            } else {
                write_field(&data, key, value)?;
            }
        }
        self.doc.commit();
        Ok(self.node(node_id))
    }

    /// Write a task ledger entry
    pub fn put_task_entry(&self, task_id: &str, entry: &Value) -> Result<(), DocumentError> {
        self.doc
            .get_map(TASKS)
            .insert(task_id, json_to_loro(entry))
            .map_err(|e| DocumentError::Mutation(e.to_string()))?;
        self.doc.commit();
        Ok(())
    }

    /// Run `mutate` and return its output plus the delta it produced.
    ///
    /// The delta is `None` when the mutation changed nothing.
    pub fn mutate<T, F>(&self, mutate: F) -> Result<(T, Option<Vec<u8>>), DocumentError>
    where
        F: FnOnce(&Self) -> Result<T, DocumentError>,
    {
        let before = self.version();
        let output = mutate(self)?;
        self.doc.commit();
        if self.version() == before {
            return Ok((output, None));
        }
        let delta = self.export_since(&before)?;
        Ok((output, Some(delta)))
    }
}

fn mutation_error(e: loro::LoroError) -> DocumentError {
    DocumentError::Mutation(e.to_string())
}

/// The map container stored under `key`, if there is one
fn child_map(parent: &LoroMap, key: &str) -> Option<LoroMap> {
    match parent.get(key) {
        Some(ValueOrContainer::Container(Container::Map(map))) => Some(map),
        _ => None,
    }
}

fn ensure_child_map(parent: &LoroMap, key: &str) -> Result<LoroMap, DocumentError> {
    match child_map(parent, key) {
        Some(map) => Ok(map),
        None => parent
            .insert_container(key, LoroMap::new())
            .map_err(mutation_error),
    }
}

/// Write one JSON field; objects become nested maps, reusing an existing one
fn write_field(target: &LoroMap, key: &str, value: &Value) -> Result<(), DocumentError> {
    match value {
        Value::Object(fields) => {
            let child = ensure_child_map(target, key)?;
            write_object(&child, fields, true)
        }
        other => target.insert(key, json_to_loro(other)).map_err(mutation_error),
    }
}

/// Write every field of `fields` into `target`, optionally deleting the rest
fn write_object(
    target: &LoroMap,
    fields: &Map<String, Value>,
    prune: bool,
) -> Result<(), DocumentError> {
    if prune {
        let stale: Vec<String> = target
            .keys()
            .map(|key| key.to_string())
            .filter(|key| !fields.contains_key(key))
            .collect();
        for key in stale {
            target.delete(&key).map_err(mutation_error)?;
        }
    }
    for (key, value) in fields {
        if target.get(key).map(|current| current.get_deep_value()) == Some(json_to_loro(value)) {
            continue;
        }
        write_field(target, key, value)?;
    }
    Ok(())
}

/// Convert a JSON value into a Loro value
pub fn json_to_loro(value: &Value) -> LoroValue {
    match value {
        Value::Null => LoroValue::Null,
        Value::Bool(b) => LoroValue::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LoroValue::from(i),
            None => LoroValue::from(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => LoroValue::from(s.as_str()),
        Value::Array(items) => {
            LoroValue::from(items.iter().map(json_to_loro).collect::<Vec<LoroValue>>())
        }
        Value::Object(map) => LoroValue::from(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_loro(v)))
                .collect::<HashMap<String, LoroValue>>(),
        ),
    }
}

/// Convert a Loro value into JSON; container ids become strings
pub fn loro_to_json(value: &LoroValue) -> Value {
    match value {
        LoroValue::Null => Value::Null,
        LoroValue::Bool(b) => Value::Bool(*b),
        LoroValue::Double(d) => serde_json::Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        LoroValue::I64(i) => Value::from(*i),
        LoroValue::String(s) => Value::String(s.to_string()),
        LoroValue::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        LoroValue::List(items) => Value::Array(items.iter().map(loro_to_json).collect()),
        LoroValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), loro_to_json(v)))
                .collect(),
        ),
        LoroValue::Container(id) => Value::String(id.to_string()),
    }
}
