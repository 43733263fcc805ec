//! 领域实体

pub mod analyst;
pub mod cluster_lock;
pub mod counters;
pub mod dispatch;
pub mod job;
pub mod task;
pub mod task_error;

pub use analyst::{Analyst, AnalystSpec, AnalystState, LockState};
pub use cluster_lock::{ClusterLock, ClusterLockSpec, LockStatus, UNBOUNDED_TRIES};
pub use counters::{AssetCounters, JobCounts, TaskStateCounts};
pub use dispatch::{
    DispatchTask, Expand, TaskEvent, TaskEventPayload, TaskStoppedEvent, ENV_JOB_ID,
    ENV_PROJECT_ID, ENV_TASK_ID,
};
pub use job::{
    Actor, Job, JobSpec, JobState, JobType, DEFAULT_MAX_RUNNING_TASKS, JOB_PRIORITY_INTERACTIVE,
    JOB_PRIORITY_REINDEX, JOB_PRIORITY_STANDARD,
};
pub use task::{PipelineScript, ScriptAsset, Task, TaskState};
pub use task_error::{TaskError, TaskErrorEvent};
