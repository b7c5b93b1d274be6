/**
 * Backend Error Types
 *
 * This module defines the error type returned by HTTP handlers. Errors from
 * the task and collaboration layers convert into it with `?` and carry their
 * own status mapping.
 *
 * # Error Types
 *
 * - `HandlerError` - Request-level failures with an explicit status
 * - `SharedError` - Validation and serialization failures
 * - `Orchestrator` - Task submission, lookup and webhook failures
 * - `Actor` - Document actor failures
 *
 * # Status Mapping
 *
 * | Source                                         | Status |
 * |------------------------------------------------|--------|
 * | invalid request / invalid webhook / validation | 400    |
 * | task, provider or reference not found          | 404    |
 * | task already / not yet terminal                | 409    |
 * | no executor for the task type                  | 422    |
 * | provider rejected the submission               | 502    |
 * | document actor shut down                       | 503    |
 * | storage and everything else                    | 500    |
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::collab::actor::ActorError;
use crate::backend::tasks::orchestrator::OrchestratorError;
use crate::shared::SharedError;

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use axum::http::StatusCode;
/// use canvas_collab::backend::error::BackendError;
///
/// let err = BackendError::handler(StatusCode::BAD_REQUEST, "Invalid request");
/// assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error (e.g. malformed path or body)
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// Shared error (from shared module)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Task orchestration error
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Document actor error
    #[error(transparent)]
    Actor(#[from] ActorError),
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::SharedError(err) => match err {
                SharedError::SerializationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::ValidationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::UnknownVariant { .. } => StatusCode::BAD_REQUEST,
            },
            Self::Orchestrator(err) => match err {
                OrchestratorError::InvalidRequest(_) | OrchestratorError::InvalidWebhook(_) => {
                    StatusCode::BAD_REQUEST
                }
                OrchestratorError::NotFound(_)
                | OrchestratorError::UnknownProvider(_)
                | OrchestratorError::UnknownReference { .. } => StatusCode::NOT_FOUND,
                OrchestratorError::AlreadyTerminal { .. } | OrchestratorError::NotTerminal(_) => {
                    StatusCode::CONFLICT
                }
                OrchestratorError::ExecutorUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                OrchestratorError::Submission(_) => StatusCode::BAD_GATEWAY,
                OrchestratorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Actor(err) => match err {
                ActorError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. } => message.clone(),
            Self::SharedError(err) => err.to_string(),
            Self::Orchestrator(err) => err.to_string(),
            Self::Actor(err) => err.to_string(),
        }
    }
}
