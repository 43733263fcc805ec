use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use archivist_core::SchedulerResult;
use archivist_domain::entities::{AssetCounters, JobCounts};
use archivist_domain::repositories::{JobRepository, TaskRepository};

/// 资产计数汇总
///
/// 任务计数的每次变化都在仓储的同一个原子步骤内累加到作业，
/// 作业汇总始终等于其任务计数之和。
#[derive(Clone)]
pub struct CounterAggregator {
    task_repo: Arc<dyn TaskRepository>,
    job_repo: Arc<dyn JobRepository>,
}

impl CounterAggregator {
    pub fn new(task_repo: Arc<dyn TaskRepository>, job_repo: Arc<dyn JobRepository>) -> Self {
        Self {
            task_repo,
            job_repo,
        }
    }

    pub async fn increment(&self, task_id: Uuid, delta: &AssetCounters) -> SchedulerResult<bool> {
        if delta.is_zero() {
            return Ok(true);
        }
        let updated = self.task_repo.increment_counters(task_id, delta).await?;
        if !updated {
            debug!("任务 {} 不存在，计数增量被忽略", task_id);
        }
        Ok(updated)
    }

    pub async fn reset(&self, task_id: Uuid) -> SchedulerResult<bool> {
        self.task_repo.reset_counters(task_id).await
    }

    pub async fn job_counts(&self, job_id: Uuid) -> SchedulerResult<JobCounts> {
        self.job_repo.get_counts(job_id).await
    }

    /// 作业的派发中任务数是否低于上限
    pub async fn has_capacity(&self, job_id: Uuid) -> SchedulerResult<bool> {
        Ok(self.job_counts(job_id).await?.has_capacity())
    }
}
