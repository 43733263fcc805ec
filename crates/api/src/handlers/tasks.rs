use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 获取单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state.job_service.get_task(id).await?;
    Ok(success(task))
}

/// 重试任务，已派发的任务会先被终止
pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let retried = state.job_service.retry_task(id).await?;
    Ok(success(retried))
}

/// 跳过任务
pub async fn skip_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let skipped = state.job_service.skip_task(id).await?;
    Ok(success(skipped))
}
