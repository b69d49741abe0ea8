use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rip_proto::model::JobId;
use serde_json::json;

/// Errors surfaced by an executor adapter. Captured into the job's `error`
/// field by the registry — one job's failure never escapes to the process.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A raw URL could not be mapped to a downloadable item.
    #[error("could not resolve '{url}': {reason}")]
    Resolution { url: String, reason: String },
    /// Network or provider failure during transfer.
    #[error("transfer failed: {0}")]
    Transfer(String),
    /// The adapter does not implement this operation for this source.
    #[error("source '{source_name}' does not support {operation}")]
    Unsupported {
        source_name: String,
        operation: &'static str,
    },
    /// Execution ended because the job's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Errors from queue actions (retry/abort/save/force).
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown job: {0}")]
    NotFound(JobId),
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Client-visible error for the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown job: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ActionError> for ApiError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::NotFound(id) => ApiError::NotFound(id),
            ActionError::Conflict(msg) => ApiError::Validation(msg),
            ActionError::Storage(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self:#}");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_maps_to_api_error() {
        let err: ApiError = ActionError::NotFound("abc".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err: ApiError = ActionError::Conflict("busy".into()).into();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
