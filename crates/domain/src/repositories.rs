//! 仓储接口
//!
//! 所有状态更新都是条件更新：期望状态不匹配时返回`Ok(false)`，不视为错误。
//! 实现必须保证每次条件更新及其附带的计数变化在同一个原子步骤内完成。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use archivist_core::SchedulerResult;

use crate::entities::{
    Analyst, AnalystSpec, AnalystState, AssetCounters, ClusterLockSpec, Job, JobCounts, JobState,
    LockState, LockStatus, PipelineScript, Task, TaskError, TaskState, TaskStateCounts,
};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> SchedulerResult<Job>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Job>>;

    async fn list(&self, state: Option<JobState>) -> SchedulerResult<Vec<Job>>;

    /// 条件更新作业状态，`expected`为空时强制更新
    async fn set_state(
        &self,
        id: Uuid,
        new_state: JobState,
        expected: Option<JobState>,
    ) -> SchedulerResult<bool>;

    async fn get_task_state_counts(&self, id: Uuid) -> SchedulerResult<TaskStateCounts>;

    async fn get_counts(&self, id: Uuid) -> SchedulerResult<JobCounts>;

    /// 调整进行中的扩展数，返回调整后的值
    async fn increment_pending_expands(&self, id: Uuid, delta: i32) -> SchedulerResult<i32>;

    /// 暂停或恢复活动作业，`expires`为自动恢复时间。作业不是活动状态或标记未变化时返回`false`
    async fn set_paused(
        &self,
        id: Uuid,
        paused: bool,
        expires: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool>;

    /// 恢复暂停期已过的活动作业，返回恢复的数量
    async fn resume_expired_pauses(&self) -> SchedulerResult<usize>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task, script: &PipelineScript) -> SchedulerResult<Task>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Task>>;

    async fn get_script(&self, id: Uuid) -> SchedulerResult<Option<PipelineScript>>;

    async fn list_by_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>>;

    async fn list_by_job_and_state(
        &self,
        job_id: Uuid,
        state: TaskState,
    ) -> SchedulerResult<Vec<Task>>;

    /// 活动且未暂停作业中的Waiting任务，按作业优先级，同优先级先进先出
    async fn get_waiting(&self, limit: usize) -> SchedulerResult<Vec<Task>>;

    /// 条件更新任务状态
    ///
    /// 任务从非派发状态进入Queued/Running且作业已达到`max_running_tasks`时返回`false`。
    /// 期望状态与当前状态一致但状态边非法时返回`InvalidStateTransition`，期望状态过期时只返回`false`。
    async fn set_state(
        &self,
        id: Uuid,
        new_state: TaskState,
        expected: Option<TaskState>,
    ) -> SchedulerResult<bool>;

    /// 原子地重新排队：期望状态 -> Waiting，run_count加一，资产计数清零
    async fn requeue(&self, id: Uuid, expected: TaskState) -> SchedulerResult<bool>;

    async fn set_host(&self, id: Uuid, host: Option<&str>) -> SchedulerResult<bool>;

    /// 仅当任务处于Running且由该endpoint持有时刷新心跳时间
    async fn update_ping_time(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool>;

    /// Queued/Running且心跳早于`now - max_silence`的任务
    async fn get_orphans(&self, max_silence: Duration, limit: usize) -> SchedulerResult<Vec<Task>>;

    async fn set_exit_status(&self, id: Uuid, exit_status: i32) -> SchedulerResult<bool>;

    async fn set_progress(&self, id: Uuid, progress: i32) -> SchedulerResult<bool>;

    async fn set_status(&self, id: Uuid, status: &str) -> SchedulerResult<bool>;

    /// 同时累加到任务及其作业
    async fn increment_counters(&self, id: Uuid, delta: &AssetCounters) -> SchedulerResult<bool>;

    /// 任务计数清零，作业汇总相应扣减
    async fn reset_counters(&self, id: Uuid) -> SchedulerResult<bool>;

    /// 活动作业中等待派发的任务总数
    async fn count_pending(&self) -> SchedulerResult<u64>;
}

#[async_trait]
pub trait AnalystRepository: Send + Sync {
    /// 按endpoint创建或刷新
    async fn upsert(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Analyst>>;

    async fn get_by_endpoint(&self, endpoint: &str) -> SchedulerResult<Option<Analyst>>;

    async fn list(&self) -> SchedulerResult<Vec<Analyst>>;

    /// 可接收任务的Analyst，按空闲内存降序
    async fn list_available(
        &self,
        min_free_ram_mb: i32,
        max_load: f32,
    ) -> SchedulerResult<Vec<Analyst>>;

    async fn set_lock(
        &self,
        id: Uuid,
        new_state: LockState,
        expected: LockState,
    ) -> SchedulerResult<bool>;

    async fn set_task_id(&self, id: Uuid, task_id: Option<Uuid>) -> SchedulerResult<bool>;

    /// 条件更新Analyst状态，置为Down时同时清除task_id
    async fn set_state(
        &self,
        id: Uuid,
        new_state: AnalystState,
        expected: AnalystState,
    ) -> SchedulerResult<bool>;

    /// 处于`state`且超过`max_silence`没有心跳的Analyst
    async fn get_unresponsive(
        &self,
        state: AnalystState,
        max_silence: Duration,
    ) -> SchedulerResult<Vec<Analyst>>;

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
}

#[async_trait]
pub trait TaskErrorRepository: Send + Sync {
    async fn create(&self, error: &TaskError) -> SchedulerResult<TaskError>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<TaskError>>;

    async fn list_by_job(&self, job_id: Uuid) -> SchedulerResult<Vec<TaskError>>;

    async fn list_by_task(&self, task_id: Uuid) -> SchedulerResult<Vec<TaskError>>;

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
}

#[async_trait]
pub trait ClusterLockRepository: Send + Sync {
    /// 锁空闲或已过期时获取成功，过期时间为`now + spec.timeout`
    async fn lock(&self, spec: &ClusterLockSpec, owner: &str) -> SchedulerResult<LockStatus>;

    async fn unlock(&self, name: &str, owner: &str) -> SchedulerResult<bool>;

    async fn is_locked(&self, name: &str) -> SchedulerResult<bool>;

    async fn clear_expired(&self) -> SchedulerResult<u64>;
}
