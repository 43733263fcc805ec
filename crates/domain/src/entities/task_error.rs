use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务错误记录，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub id: Uuid,
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub path: Option<String>,
    pub message: String,
    pub processor: String,
    pub fatal: bool,
    pub endpoint: String,
    pub phase: String,
    pub time_created: DateTime<Utc>,
}

/// Analyst上报的错误事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskErrorEvent {
    pub asset_id: Option<Uuid>,
    pub path: Option<String>,
    pub message: String,
    pub processor: String,
    pub fatal: bool,
    pub phase: String,
}

impl TaskErrorEvent {
    /// 调度器自身产生的致命错误
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            asset_id: None,
            path: None,
            message: message.into(),
            processor: "unknown".to_string(),
            fatal: true,
            phase: "unknown".to_string(),
        }
    }
}

impl TaskError {
    pub fn from_event(task_id: Uuid, job_id: Uuid, endpoint: &str, event: &TaskErrorEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            job_id,
            asset_id: event.asset_id,
            path: event.path.clone(),
            message: event.message.clone(),
            processor: event.processor.clone(),
            fatal: event.fatal,
            endpoint: endpoint.to_string(),
            phase: event.phase.clone(),
            time_created: Utc::now(),
        }
    }
}
