use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use archivist_core::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(SchedulerError::JobNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "JOB_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::AnalystNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "ANALYST_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::InvalidJobSpec(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_JOB_SPEC")
            }
            ApiError::Scheduler(SchedulerError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
            }
            ApiError::Scheduler(SchedulerError::InvalidStateTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
            }
            ApiError::Scheduler(SchedulerError::JobNotActive { .. }) => {
                (StatusCode::CONFLICT, "JOB_NOT_ACTIVE")
            }
            ApiError::Scheduler(SchedulerError::ExpandRejected(_)) => {
                (StatusCode::CONFLICT, "EXPAND_REJECTED")
            }
            ApiError::Scheduler(SchedulerError::LockTimeout { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT")
            }
            ApiError::Scheduler(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let message = match &self {
            ApiError::Scheduler(e) if !status.is_server_error() => e.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound => "请求的资源不存在".to_string(),
            _ => "系统内部错误".to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
