//! Scripted executors
//!
//! Stand-ins for real providers. A [`ScriptedExecutor`] answers `submit`
//! from a closure, `poll` from a queue of prepared results and webhooks
//! from a tiny `{ id, status, url, error }` payload format, and counts the
//! calls it receives.

use async_trait::async_trait;
use canvas_collab::backend::tasks::executor::{Executor, ExecutorError};
use canvas_collab::shared::task::{CompletionMode, ExecutorResult, TaskType};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&Value) -> Result<ExecutorResult, ExecutorError> + Send + Sync>;

pub struct ScriptedExecutor {
    name: String,
    mode: CompletionMode,
    task_types: Vec<TaskType>,
    respond: Responder,
    polls: Mutex<VecDeque<ExecutorResult>>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl ScriptedExecutor {
    fn build(name: &str, mode: CompletionMode, task_types: &[TaskType], respond: Responder) -> Self {
        Self {
            name: name.to_string(),
            mode,
            task_types: task_types.to_vec(),
            respond,
            polls: Mutex::new(VecDeque::new()),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    /// Executor whose `submit` returns `respond(params)` as the final result
    pub fn sync<F>(name: &str, task_types: &[TaskType], respond: F) -> Arc<Self>
    where
        F: Fn(&Value) -> ExecutorResult + Send + Sync + 'static,
    {
        Arc::new(Self::build(
            name,
            CompletionMode::Sync,
            task_types,
            Box::new(move |params| Ok(respond(params))),
        ))
    }

    /// Executor whose `submit` fails outright
    pub fn rejecting(name: &str, task_types: &[TaskType], message: &str) -> Arc<Self> {
        let message = message.to_string();
        Arc::new(Self::build(
            name,
            CompletionMode::Sync,
            task_types,
            Box::new(move |_| {
                Err(ExecutorError::Rejected {
                    status: 400,
                    message: message.clone(),
                })
            }),
        ))
    }

    /// Polled executor; each poll pops the next prepared result and reports
    /// "still running" once the queue is empty
    pub fn polling(name: &str, task_types: &[TaskType], polls: Vec<ExecutorResult>) -> Arc<Self> {
        let jobs = AtomicUsize::new(0);
        let provider = name.to_string();
        let executor = Self::build(
            name,
            CompletionMode::Poll,
            task_types,
            Box::new(move |_| {
                let n = jobs.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ExecutorResult::accepted(format!("job-{n}"), provider.clone()))
            }),
        );
        *executor.polls.lock().unwrap() = polls.into();
        Arc::new(executor)
    }

    /// Webhook executor; jobs are named `job-1`, `job-2`, ...
    pub fn webhook(name: &str, task_types: &[TaskType]) -> Arc<Self> {
        let jobs = AtomicUsize::new(0);
        let provider = name.to_string();
        Arc::new(Self::build(
            name,
            CompletionMode::Webhook,
            task_types,
            Box::new(move |_| {
                let n = jobs.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ExecutorResult::accepted(format!("job-{n}"), provider.clone()))
            }),
        ))
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn provider(&self) -> &str {
        &self.name
    }

    fn task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    async fn submit(&self, params: &Value) -> Result<ExecutorResult, ExecutorError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(params)
    }

    async fn poll(&self, _external_ref: &str) -> Result<ExecutorResult, ExecutorError> {
        if self.mode != CompletionMode::Poll {
            return Err(ExecutorError::unsupported(self.name.clone(), "poll"));
        }
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ExecutorResult::still_pending))
    }

    async fn process_webhook(&self, payload: &Value) -> Result<ExecutorResult, ExecutorError> {
        if self.mode != CompletionMode::Webhook {
            return Err(ExecutorError::unsupported(self.name.clone(), "webhook"));
        }
        let external_ref = payload["id"]
            .as_str()
            .ok_or_else(|| ExecutorError::InvalidResponse("missing id".into()))?;
        let result = match payload["status"].as_str() {
            Some("done") => {
                ExecutorResult::success_url(payload["url"].as_str().unwrap_or("https://cdn/hook.png"))
            }
            Some("error") => ExecutorResult::failed(payload["error"].as_str().unwrap_or("provider error")),
            _ => ExecutorResult::still_pending(),
        };
        Ok(result.with_external_ref(external_ref))
    }
}
