use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::{Expand, PipelineScript, Task, TaskState};
use archivist_domain::repositories::{JobRepository, TaskRepository};

use crate::job_service::JobService;

/// 运行中的任务向所属作业追加新任务
///
/// 扩展进行期间作业的`pending_expands`大于零，作业不会被判定为完成。
pub struct TaskExpansion {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    job_service: Arc<JobService>,
}

impl TaskExpansion {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        job_service: Arc<JobService>,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            job_service,
        }
    }

    /// 由父任务发起的扩展，新任务继承父脚本的全局设置
    pub async fn expand(&self, expand: &Expand) -> SchedulerResult<Task> {
        let parent = self.job_service.get_task(expand.task_id).await?;
        if parent.job_id != expand.job_id {
            return Err(SchedulerError::ExpandRejected(format!(
                "任务 {} 不属于作业 {}",
                parent.id, expand.job_id
            )));
        }
        if parent.state != TaskState::Running || !parent.is_hosted_by(&expand.endpoint) {
            return Err(SchedulerError::ExpandRejected(format!(
                "任务 {} 没有在 {} 上运行",
                parent.id, expand.endpoint
            )));
        }

        let parent_script = self
            .task_repo
            .get_script(parent.id)
            .await?
            .unwrap_or_default();
        let mut script = expand.script.clone();
        script.inherit_from(&parent_script);

        let task = self.expand_job(expand.job_id, &script).await?;
        info!("任务 {} 扩展出新任务 {} ({})", parent.id, task.id, task.name);
        Ok(task)
    }

    /// 向活动作业追加一个任务
    pub async fn expand_job(&self, job_id: Uuid, script: &PipelineScript) -> SchedulerResult<Task> {
        let job = self.job_service.get_job(job_id).await?;
        if !job.is_active() {
            return Err(SchedulerError::JobNotActive {
                id: job_id.to_string(),
            });
        }

        self.job_repo.increment_pending_expands(job_id, 1).await?;
        let result = self.job_service.create_task(job_id, script).await;
        self.job_repo.increment_pending_expands(job_id, -1).await?;

        if result.is_err() {
            // 扩展失败时作业可能已经满足完成条件
            if let Err(e) = self.job_service.check_and_set_job_finished(job_id).await {
                error!("扩展失败后检查作业 {} 是否完成时出错: {}", job_id, e);
            }
        }
        result
    }
}
