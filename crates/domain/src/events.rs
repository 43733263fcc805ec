//! 领域事件
//!
//! 作业与任务状态变化后发布，供外部系统订阅

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{JobState, TaskState};

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStateChangeEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub new_state: JobState,
    pub old_state: Option<JobState>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateChangeEvent {
    pub id: Uuid,
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub new_state: TaskState,
    pub old_state: Option<TaskState>,
    pub occurred_at: DateTime<Utc>,
}

/// 调度器对外发布的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SchedulerEvent {
    JobStateChange(JobStateChangeEvent),
    TaskStateChange(TaskStateChangeEvent),
}

impl SchedulerEvent {
    pub fn job_state_change(job_id: Uuid, new_state: JobState, old_state: Option<JobState>) -> Self {
        SchedulerEvent::JobStateChange(JobStateChangeEvent {
            id: Uuid::new_v4(),
            job_id,
            new_state,
            old_state,
            occurred_at: Utc::now(),
        })
    }

    pub fn task_state_change(
        task_id: Uuid,
        job_id: Uuid,
        new_state: TaskState,
        old_state: Option<TaskState>,
    ) -> Self {
        SchedulerEvent::TaskStateChange(TaskStateChangeEvent {
            id: Uuid::new_v4(),
            task_id,
            job_id,
            new_state,
            old_state,
            occurred_at: Utc::now(),
        })
    }
}

impl DomainEvent for SchedulerEvent {
    fn event_id(&self) -> Uuid {
        match self {
            SchedulerEvent::JobStateChange(e) => e.id,
            SchedulerEvent::TaskStateChange(e) => e.id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            SchedulerEvent::JobStateChange(_) => "JobStateChange",
            SchedulerEvent::TaskStateChange(_) => "TaskStateChange",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SchedulerEvent::JobStateChange(e) => e.occurred_at,
            SchedulerEvent::TaskStateChange(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            SchedulerEvent::JobStateChange(e) => e.job_id.to_string(),
            SchedulerEvent::TaskStateChange(e) => e.task_id.to_string(),
        }
    }
}
