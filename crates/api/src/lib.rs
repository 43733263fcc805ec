//! # Archivist API
//!
//! 基于Axum的HTTP接口，分为两部分：
//! - `/cluster/*`：Analyst心跳与任务事件回调
//! - `/api/v1/*`：作业、任务与Analyst的管理接口
//!
//! 另外提供`/health`与Prometheus格式的指标端点（默认`/metrics`）。
//!
//! 成功响应统一为`{"success":true,"data":...,"timestamp":...}`，
//! 错误响应为`{"error":{"message","type","code","timestamp"}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;

use archivist_core::config::models::ApiConfig;

use middleware::{cors_layer, request_logging, request_timeout, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig, metrics_endpoint: &str) -> Router {
    let timeout = Duration::from_secs(config.request_timeout_seconds);

    let app = create_routes(state, metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(axum::middleware::from_fn_with_state(timeout, request_timeout)),
    );

    if config.cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
