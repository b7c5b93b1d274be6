/**
 * HTTP Job Executor
 *
 * Adapter for generation providers exposing a small JSON job API:
 *
 * - `POST {base}/jobs` with the task parameters starts a job
 * - `GET  {base}/jobs/{id}` reports its progress
 * - webhook callbacks carry the same job document
 *
 * ```json
 * { "id": "job-42", "status": "succeeded", "output_url": "https://cdn/x.png" }
 * ```
 *
 * # Status mapping
 *
 * - `succeeded` / `completed` - success (`output_url` and/or `output`)
 * - `failed` / `error` / `canceled` - definitive failure
 * - anything else - still running
 *
 * While polling, HTTP 5xx replies are transient errors and 4xx replies are
 * definitive failures. A 4xx reply to a submission rejects it outright.
 */

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{Executor, ExecutorError};
use crate::shared::task::{CompletionMode, ExecutorResult, TaskType};

/// Job document returned by the provider
#[derive(Debug, Clone, Deserialize)]
struct Job {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Job {
    fn is_terminal(&self) -> bool {
        !matches!(classify(&self.status), JobState::Running)
    }
}

enum JobState {
    Succeeded,
    Failed,
    Running,
}

fn classify(status: &str) -> JobState {
    match status.to_ascii_lowercase().as_str() {
        "succeeded" | "completed" => JobState::Succeeded,
        "failed" | "error" | "canceled" | "cancelled" => JobState::Failed,
        _ => JobState::Running,
    }
}

pub struct HttpExecutor {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    mode: CompletionMode,
    task_types: Vec<TaskType>,
    client: Client,
}

impl std::fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .finish()
    }
}

impl HttpExecutor {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        mode: CompletionMode,
        task_types: Vec<TaskType>,
        timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            mode,
            task_types,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Map a job document onto an executor result
    fn interpret(&self, job: &Job) -> ExecutorResult {
        let mut result = match classify(&job.status) {
            JobState::Succeeded => ExecutorResult {
                completed: true,
                result_url: job.output_url.clone(),
                result_data: job.output.clone(),
                ..Default::default()
            },
            JobState::Failed => ExecutorResult::failed(
                job.error
                    .clone()
                    .unwrap_or_else(|| format!("job {}", job.status)),
            ),
            JobState::Running => ExecutorResult::still_pending(),
        };
        result.external_ref = job.id.clone();
        result.provider = Some(self.provider.clone());
        result
    }

    async fn read_job(response: reqwest::Response) -> Result<Job, ExecutorError> {
        response
            .json::<Job>()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(format!("Failed to parse job: {}", e)))
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        response
            .text()
            .await
            .ok()
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| status.to_string())
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    async fn submit(&self, params: &Value) -> Result<ExecutorResult, ExecutorError> {
        let response = self
            .authorized(self.client.post(self.url("jobs")))
            .json(params)
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ExecutorError::Rejected {
                status: status.as_u16(),
                message: Self::error_text(response).await,
            });
        }
        if !status.is_success() {
            return Err(ExecutorError::Transport(format!(
                "Request failed: {} - {}",
                status,
                Self::error_text(response).await
            )));
        }

        let job = Self::read_job(response).await?;

        match self.mode {
            CompletionMode::Sync if !job.is_terminal() => Ok(ExecutorResult::failed(format!(
                "synchronous job returned non-terminal status '{}'",
                job.status
            ))),
            CompletionMode::Sync => Ok(self.interpret(&job)),
            CompletionMode::Poll | CompletionMode::Webhook => {
                if job.is_terminal() {
                    return Ok(self.interpret(&job));
                }
                let id = job
                    .id
                    .clone()
                    .ok_or_else(|| ExecutorError::InvalidResponse("job has no id".to_string()))?;
                Ok(ExecutorResult::accepted(id, self.provider.clone()))
            }
        }
    }

    async fn poll(&self, external_ref: &str) -> Result<ExecutorResult, ExecutorError> {
        if self.mode != CompletionMode::Poll {
            return Err(ExecutorError::unsupported(self.provider.clone(), "poll"));
        }

        let response = self
            .authorized(self.client.get(self.url(&format!("jobs/{}", external_ref))))
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let message = Self::error_text(response).await;
            return Ok(ExecutorResult::transient(format!("{}: {}", status, message))
                .with_external_ref(external_ref));
        }
        if status.is_client_error() {
            let message = Self::error_text(response).await;
            return Ok(ExecutorResult::failed(format!("{}: {}", status, message))
                .with_external_ref(external_ref));
        }

        let mut job = Self::read_job(response).await?;
        job.id.get_or_insert_with(|| external_ref.to_string());
        Ok(self.interpret(&job))
    }

    async fn process_webhook(&self, payload: &Value) -> Result<ExecutorResult, ExecutorError> {
        if self.mode != CompletionMode::Webhook {
            return Err(ExecutorError::unsupported(self.provider.clone(), "webhooks"));
        }

        let job: Job = serde_json::from_value(payload.clone())
            .map_err(|e| ExecutorError::InvalidResponse(format!("Invalid webhook payload: {}", e)))?;
        if job.id.is_none() {
            return Err(ExecutorError::InvalidResponse(
                "webhook payload has no job id".to_string(),
            ));
        }
        Ok(self.interpret(&job))
    }
}
