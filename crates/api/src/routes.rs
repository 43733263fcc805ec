use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use archivist_dispatcher::{DispatchService, HeartbeatHandler, JobService, TaskExpansion};
use archivist_domain::repositories::AnalystRepository;

use crate::handlers::{
    analysts::list_analysts,
    cluster::{ping, task_event},
    health::health_check,
    jobs::{
        cancel_job, create_job, get_job, list_job_errors, list_job_tasks, list_jobs, pause_job,
        resume_job, retry_all_failures,
    },
    metrics::render_metrics,
    tasks::{get_task, retry_task, skip_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub job_service: Arc<JobService>,
    pub dispatch: Arc<DispatchService>,
    pub expansion: Arc<TaskExpansion>,
    pub heartbeat: Arc<HeartbeatHandler>,
    pub analyst_repo: Arc<dyn AnalystRepository>,
    /// 未安装Prometheus记录器时`/metrics`返回404
    pub metrics_handle: Option<PrometheusHandle>,
}

/// 创建API路由，指标端点路径可配置
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    Router::new()
        // 健康检查与指标
        .route("/health", get(health_check))
        .route(metrics_endpoint, get(render_metrics))
        // Analyst回调
        .route("/cluster/_ping", post(ping))
        .route("/cluster/_event", post(task_event))
        // 作业管理
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/jobs/{id}/tasks", get(list_job_tasks))
        .route("/api/v1/jobs/{id}/errors", get(list_job_errors))
        .route("/api/v1/jobs/{id}/_cancel", put(cancel_job))
        .route("/api/v1/jobs/{id}/_pause", put(pause_job))
        .route("/api/v1/jobs/{id}/_resume", put(resume_job))
        .route("/api/v1/jobs/{id}/_retryAllFailures", put(retry_all_failures))
        // 任务管理
        .route("/api/v1/tasks/{id}", get(get_task))
        .route("/api/v1/tasks/{id}/_retry", put(retry_task))
        .route("/api/v1/tasks/{id}/_skip", put(skip_task))
        // Analyst
        .route("/api/v1/analysts", get(list_analysts))
        .with_state(state)
}
