use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use archivist_domain::entities::{Actor, Job, JobCounts, JobSpec, JobState};

use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 作业提交请求
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    #[serde(flatten)]
    pub spec: JobSpec,
}

impl CreateJobRequest {
    fn actor(&self) -> Actor {
        match self.user_id {
            Some(user_id) => Actor::new(
                user_id,
                self.project_id,
                self.user_name.clone().unwrap_or_default(),
            ),
            None => Actor::system(self.project_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub state: Option<JobState>,
}

/// 作业详情，附带任务统计
#[derive(Debug, Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: Job,
    pub counts: JobCounts,
}

/// 提交作业
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .job_service
        .create_job(&request.actor(), &request.spec)
        .await?;
    Ok(created(job))
}

/// 获取作业列表
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let jobs = state.job_service.list_jobs(params.state).await?;
    Ok(success(jobs))
}

/// 获取单个作业
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let job = state.job_service.get_job(id).await?;
    let counts = state.job_service.get_job_counts(id).await?;
    Ok(success(JobDetails { job, counts }))
}

/// 获取作业下的全部任务
pub async fn list_job_tasks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.job_service.get_job(id).await?;
    let tasks = state.job_service.list_tasks(id).await?;
    Ok(success(tasks))
}

/// 获取作业的任务错误
pub async fn list_job_errors(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.job_service.get_job(id).await?;
    let errors = state.job_service.list_task_errors(id).await?;
    Ok(success(errors))
}

/// 取消作业
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.job_service.cancel_job(id).await?;
    let message = if cancelled {
        "作业已取消"
    } else {
        "作业不处于活动状态"
    };
    Ok(ApiResponse::success_with_message(cancelled, message.to_string()))
}

/// 暂停参数，不指定时长时一直暂停到手动恢复
#[derive(Debug, Deserialize)]
pub struct PauseParams {
    pub duration_seconds: Option<u64>,
}

/// 暂停作业派发
pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PauseParams>,
) -> ApiResult<impl IntoResponse> {
    let duration = params.duration_seconds.map(std::time::Duration::from_secs);
    let paused = state.job_service.pause_job(id, duration).await?;
    let message = if paused { "作业已暂停" } else { "作业已处于暂停状态" };
    Ok(ApiResponse::success_with_message(paused, message.to_string()))
}

/// 恢复作业派发
pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let resumed = state.job_service.resume_job(id).await?;
    let message = if resumed { "作业已恢复" } else { "作业未暂停" };
    Ok(ApiResponse::success_with_message(resumed, message.to_string()))
}

/// 重试作业下全部失败的任务
pub async fn retry_all_failures(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let count = state.job_service.retry_all_task_failures(id).await?;
    Ok(success(count))
}
