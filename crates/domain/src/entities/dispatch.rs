use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::counters::AssetCounters;
use super::job::Job;
use super::task::{PipelineScript, Task, TaskState};
use super::task_error::TaskErrorEvent;

pub const ENV_TASK_ID: &str = "ARCHIVIST_TASK_ID";
pub const ENV_JOB_ID: &str = "ARCHIVIST_JOB_ID";
pub const ENV_PROJECT_ID: &str = "ARCHIVIST_PROJECT_ID";

/// 发送给Analyst的任务，派发时临时构建，不落库
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchTask {
    pub task: Task,
    pub script: PipelineScript,
    pub env: HashMap<String, String>,
    pub args: HashMap<String, serde_json::Value>,
    pub user_id: Uuid,
}

impl DispatchTask {
    pub fn new(task: Task, job: &Job, script: PipelineScript) -> Self {
        let mut env = job.env.clone();
        env.insert(ENV_TASK_ID.to_string(), task.id.to_string());
        env.insert(ENV_JOB_ID.to_string(), task.job_id.to_string());
        env.insert(ENV_PROJECT_ID.to_string(), task.project_id.to_string());

        Self {
            task,
            script,
            env,
            args: job.args.clone(),
            user_id: job.user_id,
        }
    }
}

/// 运行中的任务请求向作业追加新任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expand {
    pub endpoint: String,
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub script: PipelineScript,
}

/// 任务停止事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStoppedEvent {
    pub exit_status: i32,
    #[serde(default)]
    pub manual_kill: bool,
    /// 显式指定的新状态，为空时由退出码推导
    #[serde(default)]
    pub new_state: Option<TaskState>,
}

impl TaskStoppedEvent {
    pub fn exited(exit_status: i32) -> Self {
        Self {
            exit_status,
            manual_kill: false,
            new_state: None,
        }
    }
}

/// Analyst上报的任务事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskEventPayload {
    Started,
    Stopped(TaskStoppedEvent),
    Error(TaskErrorEvent),
    /// 资产计数增量
    Stats(AssetCounters),
    Expand { script: PipelineScript },
    Progress { progress: i32 },
    Status { status: String },
    Message { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub endpoint: String,
    pub event: TaskEventPayload,
}
