use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::PipelineScript;

/// 每个作业默认允许同时派发的任务数
pub const DEFAULT_MAX_RUNNING_TASKS: i32 = 1024;

/// 作业优先级，数值越小越先派发
pub const JOB_PRIORITY_STANDARD: i32 = 100;
pub const JOB_PRIORITY_INTERACTIVE: i32 = 1;
pub const JOB_PRIORITY_REINDEX: i32 = -32000;

/// 作业状态，只允许前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Active,
    Cancelled,
    Finished,
}

impl JobState {
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Active, JobState::Cancelled) | (JobState::Active, JobState::Finished)
        )
    }

    pub fn is_active(&self) -> bool {
        *self == JobState::Active
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Active => "Active",
            JobState::Cancelled => "Cancelled",
            JobState::Finished => "Finished",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Import,
    Export,
    Batch,
    Generate,
}

/// 调用方身份，显式传入而不是依赖线程上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: Uuid, project_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            project_id,
            name: name.into(),
        }
    }

    /// 系统后台维护任务使用的身份
    pub fn system(project_id: Uuid) -> Self {
        Self {
            user_id: Uuid::nil(),
            project_id,
            name: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub job_type: JobType,
    pub state: JobState,
    pub env: HashMap<String, String>,
    pub args: HashMap<String, serde_json::Value>,
    pub max_running_tasks: i32,
    pub priority: i32,
    /// 暂停的作业不参与派发
    pub paused: bool,
    /// 到期后由维护循环自动恢复，为空时只能手动恢复
    pub time_pause_expired: Option<DateTime<Utc>>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_stopped: Option<DateTime<Utc>>,
}

/// 提交作业的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    pub max_running_tasks: Option<i32>,
    pub priority: Option<i32>,
    /// 以暂停状态创建
    #[serde(default)]
    pub paused: bool,
    /// 创建后暂停的秒数，设置时隐含`paused`
    pub pause_duration_seconds: Option<i64>,
    /// 每个脚本生成一个任务
    pub scripts: Vec<PipelineScript>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, job_type: JobType, scripts: Vec<PipelineScript>) -> Self {
        Self {
            name: name.into(),
            job_type,
            env: HashMap::new(),
            args: HashMap::new(),
            max_running_tasks: None,
            priority: None,
            paused: false,
            pause_duration_seconds: None,
            scripts,
        }
    }
}

impl Job {
    pub fn from_spec(actor: &Actor, spec: &JobSpec) -> Self {
        let now = Utc::now();
        let time_pause_expired = spec
            .pause_duration_seconds
            .map(|secs| now + chrono::Duration::seconds(secs));

        // 导出作业至少按交互优先级派发
        let mut priority = spec.priority.unwrap_or(JOB_PRIORITY_STANDARD);
        if spec.job_type == JobType::Export {
            priority = priority.min(JOB_PRIORITY_INTERACTIVE);
        }

        Self {
            id: Uuid::new_v4(),
            project_id: actor.project_id,
            user_id: actor.user_id,
            name: spec.name.clone(),
            job_type: spec.job_type,
            state: JobState::Active,
            env: spec.env.clone(),
            args: spec.args.clone(),
            max_running_tasks: spec.max_running_tasks.unwrap_or(DEFAULT_MAX_RUNNING_TASKS),
            priority,
            paused: spec.paused || time_pause_expired.is_some(),
            time_pause_expired,
            time_created: now,
            time_modified: now,
            time_started: None,
            time_stopped: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// 活动且未暂停
    pub fn is_dispatchable(&self) -> bool {
        self.is_active() && !self.paused
    }

    /// 暂停期限已过
    pub fn pause_expired(&self, now: DateTime<Utc>) -> bool {
        self.paused && self.time_pause_expired.is_some_and(|t| t < now)
    }
}
