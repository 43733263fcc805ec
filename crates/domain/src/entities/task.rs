use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::counters::AssetCounters;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Queued,
    Running,
    Success,
    Failure,
    Skipped,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Waiting,
        TaskState::Queued,
        TaskState::Running,
        TaskState::Success,
        TaskState::Failure,
        TaskState::Skipped,
    ];

    /// 已派发到Analyst（Queued或Running）
    pub fn is_dispatched(&self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }

    /// 终态
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Skipped
        )
    }

    /// 条件更新(CAS)允许的状态边
    ///
    /// Failure -> Waiting 只用于失败任务的批量重试，其余终态不可离开。
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Waiting, Queued)
                | (Waiting, Skipped)
                | (Queued, Running)
                | (Queued, Waiting)
                | (Queued, Skipped)
                | (Queued, Failure)
                | (Running, Success)
                | (Running, Failure)
                | (Running, Skipped)
                | (Running, Waiting)
                | (Failure, Waiting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "Waiting",
            TaskState::Queued => "Queued",
            TaskState::Running => "Running",
            TaskState::Success => "Success",
            TaskState::Failure => "Failure",
            TaskState::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务：作业中的最小派发单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub state: TaskState,
    /// 当前执行该任务的Analyst endpoint
    pub host: Option<String>,
    pub run_count: i32,
    pub progress: i32,
    pub status: Option<String>,
    pub exit_status: Option<i32>,
    pub counters: AssetCounters,
    pub time_ping: DateTime<Utc>,
    pub time_created: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_stopped: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: Uuid, project_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            project_id,
            name: name.into(),
            state: TaskState::Waiting,
            host: None,
            run_count: 0,
            progress: 0,
            status: None,
            exit_status: None,
            counters: AssetCounters::default(),
            time_ping: now,
            time_created: now,
            time_started: None,
            time_stopped: None,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        self.state.is_dispatched()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// 是否还能自动重试
    pub fn is_auto_retryable(&self, retry_limit: i32) -> bool {
        self.run_count < retry_limit
    }

    /// 任务是否由该endpoint持有
    pub fn is_hosted_by(&self, endpoint: &str) -> bool {
        self.host.as_deref() == Some(endpoint)
    }
}

/// 管道脚本，执行引擎负责解释其内容
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineScript {
    pub name: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub globals: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub execute: Vec<serde_json::Value>,
    /// 脚本要处理的资产列表
    #[serde(default)]
    pub over: Vec<ScriptAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptAsset {
    pub id: Uuid,
    pub path: Option<String>,
}

impl PipelineScript {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 继承父脚本的全局设置，未指定处理器时沿用父脚本的处理器
    pub fn inherit_from(&mut self, parent: &PipelineScript) {
        self.settings = parent.settings.clone();
        self.globals = parent.globals.clone();
        if self.execute.is_empty() {
            self.execute = parent.execute.clone();
        }
    }
}
