use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use archivist_dispatcher::DispatchServiceTrait;

use crate::routes::AppState;

/// 健康检查，附带当前等待派发的任务数
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let pending = match state.dispatch.pending_task_count().await {
        Ok(count) => json!(count),
        Err(e) => {
            tracing::warn!("统计等待任务数失败: {}", e);
            Value::Null
        }
    };

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "archivist",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_tasks": pending,
    }))
}
