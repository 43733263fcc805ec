use axum::{extract::State, response::IntoResponse, Json};
use tracing::debug;

use archivist_dispatcher::DispatchServiceTrait;
use archivist_domain::entities::{AnalystSpec, Expand, TaskEvent, TaskEventPayload};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// Analyst心跳
pub async fn ping(
    State(state): State<AppState>,
    Json(spec): Json<AnalystSpec>,
) -> ApiResult<impl IntoResponse> {
    if spec.endpoint.trim().is_empty() {
        return Err(ApiError::BadRequest("endpoint不能为空".to_string()));
    }

    let analyst = state.heartbeat.handle_ping(&spec).await?;
    Ok(success(analyst))
}

/// Analyst上报任务事件，扩展事件返回新建的任务
pub async fn task_event(
    State(state): State<AppState>,
    Json(event): Json<TaskEvent>,
) -> ApiResult<axum::response::Response> {
    debug!("收到 {} 的任务事件: {:?}", event.endpoint, event.event);

    if let TaskEventPayload::Expand { script } = &event.event {
        let expand = Expand {
            endpoint: event.endpoint.clone(),
            job_id: event.job_id,
            task_id: event.task_id,
            script: script.clone(),
        };
        let task = state.expansion.expand(&expand).await?;
        return Ok(created(task).into_response());
    }

    state.dispatch.handle_event(&event).await?;
    Ok(success(true).into_response())
}
