//! Node Projector
//!
//! Decides which canvas nodes need external work and translates task
//! outcomes back into node fields. The projector itself holds no state: the
//! owning document actor calls [`scan`] after each merge, claims every
//! returned work item by writing its task id into the node's marker in the
//! same mutation, and only then hands the claims to [`dispatch`]. A node
//! with a live marker is never scanned again, so each work item is submitted
//! at most once.
//!
//! # Rules
//!
//! | Node state                                              | Work              |
//! |---------------------------------------------------------|-------------------|
//! | `pending`/`generating`, no `src`, has `prompt`          | image/video task  |
//! | `completed`, has `src`, no `description`, retries left  | description task  |
//! | anything else, or a live `taskId`/`pendingTask`         | none              |

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::backend::crdt::CanvasDocument;
use crate::backend::tasks::orchestrator::TaskOrchestrator;
use crate::shared::node::{fields, NodeStatus, NodeView};
use crate::shared::task::{SubmitTaskRequest, TaskResolution, TaskStatus, TaskType};

/// `data` fields owned by the server; never forwarded as generation parameters
const SERVER_FIELDS: &[&str] = &[
    fields::STATUS,
    fields::SRC,
    fields::DESCRIPTION,
    fields::ERROR,
    fields::TASK_ID,
    fields::PENDING_TASK,
    fields::DESCRIPTION_RETRIES,
    fields::DESCRIPTION_ERROR,
];

/// One unit of work a node needs
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub node_id: String,
    pub task_type: TaskType,
    pub params: Value,
}

/// A work item whose node has been marked with `task_id`
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub task_id: Uuid,
    pub item: WorkItem,
}

impl Claim {
    pub fn new(item: WorkItem) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            item,
        }
    }

    /// Node fields recording the claim
    pub fn patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert(fields::TASK_ID.into(), json!(self.task_id.to_string()));
        patch.insert(fields::PENDING_TASK.into(), Value::Null);
        if self.item.task_type.is_generation() {
            patch.insert(fields::STATUS.into(), json!(NodeStatus::Generating.as_str()));
            patch.insert(fields::ERROR.into(), Value::Null);
        }
        patch
    }
}

/// Work needed by a single node, if any
pub fn classify(node: &NodeView<'_>, description_retry_limit: u32) -> Option<WorkItem> {
    if node.marker().is_some() {
        return None;
    }

    match node.status()? {
        NodeStatus::Pending | NodeStatus::Generating => {
            if node.src().is_some() {
                return None;
            }
            let prompt = node.prompt()?;
            let task_type = TaskType::for_node_type(node.node_type()?)?;
            Some(WorkItem {
                node_id: node.id().to_string(),
                task_type,
                params: generation_params(node, prompt),
            })
        }
        NodeStatus::Completed => {
            let src = node.src()?;
            if node.description().is_some() || node.description_retries() >= description_retry_limit {
                return None;
            }
            Some(WorkItem {
                node_id: node.id().to_string(),
                task_type: TaskType::Description,
                params: json!({
                    "src": src,
                    "node_type": node.node_type(),
                }),
            })
        }
        NodeStatus::Fin | NodeStatus::Failed => None,
    }
}

/// All work items in the document, in node id order
pub fn scan(document: &CanvasDocument, description_retry_limit: u32) -> Vec<WorkItem> {
    document
        .nodes()
        .iter()
        .filter_map(|(id, entity)| classify(&NodeView::new(id, entity), description_retry_limit))
        .collect()
}

fn generation_params(node: &NodeView<'_>, prompt: &str) -> Value {
    let mut params: Map<String, Value> = node
        .data()
        .map(|data| {
            data.iter()
                .filter(|(key, _)| !SERVER_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();
    params.insert(fields::PROMPT.into(), json!(prompt));
    if let Some(node_type) = node.node_type() {
        params.insert("node_type".into(), json!(node_type));
    }
    Value::Object(params)
}

/// Node fields for a resolved task
pub fn resolution_patch(node: &NodeView<'_>, resolution: &TaskResolution) -> Map<String, Value> {
    let mut patch = clear_markers();

    if resolution.task_type.is_generation() {
        let src = match resolution.status {
            TaskStatus::Completed => result_url(resolution),
            _ => None,
        };
        match src {
            Some(src) => {
                patch.insert(fields::STATUS.into(), json!(NodeStatus::Completed.as_str()));
                patch.insert(fields::SRC.into(), json!(src));
                patch.insert(fields::ERROR.into(), Value::Null);
            }
            None => {
                let error = resolution
                    .error
                    .clone()
                    .unwrap_or_else(|| "generation returned no result".to_string());
                patch.insert(fields::STATUS.into(), json!(NodeStatus::Failed.as_str()));
                patch.insert(fields::ERROR.into(), json!(error));
            }
        }
        return patch;
    }

    let description = match resolution.status {
        TaskStatus::Completed => description_text(resolution),
        _ => None,
    };
    match description {
        Some(text) => {
            patch.insert(fields::DESCRIPTION.into(), json!(text));
            patch.insert(fields::DESCRIPTION_ERROR.into(), Value::Null);
        }
        None => {
            let error = resolution
                .error
                .clone()
                .unwrap_or_else(|| "description returned no text".to_string());
            description_failure(node, &error, &mut patch);
        }
    }
    patch
}

/// Node fields for a work item whose submission never produced a task
pub fn submission_failure_patch(node: &NodeView<'_>, task_type: TaskType, error: &str) -> Map<String, Value> {
    let mut patch = clear_markers();
    if task_type.is_generation() {
        patch.insert(fields::STATUS.into(), json!(NodeStatus::Failed.as_str()));
        patch.insert(fields::ERROR.into(), json!(error));
    } else {
        description_failure(node, error, &mut patch);
    }
    patch
}

fn description_failure(node: &NodeView<'_>, error: &str, patch: &mut Map<String, Value>) {
    patch.insert(
        fields::DESCRIPTION_RETRIES.into(),
        json!(node.description_retries().saturating_add(1)),
    );
    patch.insert(fields::DESCRIPTION_ERROR.into(), json!(error));
}

/// Node fields releasing a claim that never produced a task row
pub fn release_patch() -> Map<String, Value> {
    clear_markers()
}

fn clear_markers() -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(fields::TASK_ID.into(), Value::Null);
    patch.insert(fields::PENDING_TASK.into(), Value::Null);
    patch
}

fn result_url(resolution: &TaskResolution) -> Option<String> {
    if let Some(url) = resolution.result_url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    match resolution.result_data.as_ref()? {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Object(map) => map
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn description_text(resolution: &TaskResolution) -> Option<String> {
    let text = match resolution.result_data.as_ref()? {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => map
            .get("description")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str),
        _ => None,
    };
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Outcome of submitting a batch of claims
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub created: usize,
    /// Claims whose submission failed, with the reason
    pub failed: Vec<(Claim, String)>,
}

/// Submit every claim; one failure never stops the others
pub async fn dispatch(
    orchestrator: &TaskOrchestrator,
    document_id: &str,
    claims: Vec<Claim>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for claim in claims {
        let request = SubmitTaskRequest {
            document_id: document_id.to_string(),
            node_id: claim.item.node_id.clone(),
            task_type: claim.item.task_type,
            params: claim.item.params.clone(),
            provider: None,
        };

        match orchestrator.submit_with_id(claim.task_id, request).await {
            Ok(task) => {
                tracing::info!(
                    "[Projector] {} task {} created for node {}",
                    task.task_type,
                    task.id,
                    task.node_id
                );
                report.created += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "[Projector] Submission for node {} failed: {}",
                    claim.item.node_id,
                    e
                );
                let reason = e.to_string();
                report.failed.push((claim, reason));
            }
        }
    }

    report
}
