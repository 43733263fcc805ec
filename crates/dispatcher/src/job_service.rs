use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use archivist_core::{MaintenanceConfig, SchedulerError, SchedulerResult};
use archivist_domain::entities::{
    Actor, AssetCounters, ClusterLockSpec, Job, JobCounts, JobSpec, JobState, PipelineScript,
    Task, TaskError, TaskErrorEvent, TaskState,
};
use archivist_domain::events::SchedulerEvent;
use archivist_domain::ports::{AnalystTransport, EventPublisher};
use archivist_domain::repositories::{JobRepository, TaskErrorRepository, TaskRepository};

use crate::cluster_lock::ClusterLockExecutor;

/// 作业服务配置
#[derive(Debug, Clone)]
pub struct JobServiceConfig {
    /// 任务自动重试的运行次数上限
    pub auto_retry_limit: i32,
    /// 等待作业收尾锁的最长时间
    pub finalize_lock_timeout: Duration,
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            auto_retry_limit: 4,                           // 最多运行4次
            finalize_lock_timeout: Duration::from_secs(60), // 1分钟
        }
    }
}

impl From<&MaintenanceConfig> for JobServiceConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            auto_retry_limit: config.auto_retry_limit,
            ..Default::default()
        }
    }
}

/// 作业与任务状态机
///
/// 所有任务状态变化都经由这里完成，状态变化成功后发布事件，
/// 任务进入终态时检查作业是否可以结束。
pub struct JobService {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    task_error_repo: Arc<dyn TaskErrorRepository>,
    transport: Arc<dyn AnalystTransport>,
    publisher: Arc<dyn EventPublisher>,
    lock_executor: ClusterLockExecutor,
    config: JobServiceConfig,
}

impl JobService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        task_error_repo: Arc<dyn TaskErrorRepository>,
        transport: Arc<dyn AnalystTransport>,
        publisher: Arc<dyn EventPublisher>,
        lock_executor: ClusterLockExecutor,
        config: Option<JobServiceConfig>,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            task_error_repo,
            transport,
            publisher,
            lock_executor,
            config: config.unwrap_or_default(),
        }
    }

    /// 创建作业，每个脚本生成一个Waiting任务
    pub async fn create_job(&self, actor: &Actor, spec: &JobSpec) -> SchedulerResult<Job> {
        if spec.name.trim().is_empty() {
            return Err(SchedulerError::InvalidJobSpec("作业名称不能为空".to_string()));
        }
        if spec.scripts.is_empty() {
            return Err(SchedulerError::InvalidJobSpec(
                "作业至少需要一个脚本".to_string(),
            ));
        }
        if spec.max_running_tasks.is_some_and(|n| n < 1) {
            return Err(SchedulerError::InvalidJobSpec(
                "max_running_tasks必须大于0".to_string(),
            ));
        }

        let job = self.job_repo.create(&Job::from_spec(actor, spec)).await?;
        for script in &spec.scripts {
            let task = Task::new(job.id, job.project_id, script.name.clone());
            self.task_repo.create(&task, script).await?;
        }

        info!("创建作业: {} ({}), 任务数: {}", job.name, job.id, spec.scripts.len());
        self.publish(SchedulerEvent::job_state_change(job.id, job.state, None))
            .await;
        Ok(job)
    }

    /// 向活动作业追加一个任务
    pub async fn create_task(&self, job_id: Uuid, script: &PipelineScript) -> SchedulerResult<Task> {
        let job = self.get_job(job_id).await?;
        if !job.is_active() {
            return Err(SchedulerError::JobNotActive {
                id: job_id.to_string(),
            });
        }

        let task = Task::new(job.id, job.project_id, script.name.clone());
        let task = self.task_repo.create(&task, script).await?;
        debug!("作业 {} 新增任务 {}", job_id, task.id);
        Ok(task)
    }

    pub async fn get_job(&self, id: Uuid) -> SchedulerResult<Job> {
        self.job_repo
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::job_not_found(id))
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> SchedulerResult<Vec<Job>> {
        self.job_repo.list(state).await
    }

    pub async fn get_task(&self, id: Uuid) -> SchedulerResult<Task> {
        self.task_repo
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(id))
    }

    pub async fn list_tasks(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>> {
        self.task_repo.list_by_job(job_id).await
    }

    pub async fn get_job_counts(&self, job_id: Uuid) -> SchedulerResult<JobCounts> {
        self.get_job(job_id).await?;
        self.job_repo.get_counts(job_id).await
    }

    pub async fn list_task_errors(&self, job_id: Uuid) -> SchedulerResult<Vec<TaskError>> {
        self.task_error_repo.list_by_job(job_id).await
    }

    pub async fn delete_task_error(&self, id: Uuid) -> SchedulerResult<bool> {
        self.task_error_repo.delete(id).await
    }

    /// 任务是否还能自动重试
    pub fn is_auto_retryable(&self, task: &Task) -> bool {
        task.is_auto_retryable(self.config.auto_retry_limit)
    }

    /// 条件更新任务状态
    ///
    /// `expected`为空时强制更新。更新成功返回`true`并发布事件。
    pub async fn set_task_state(
        &self,
        task: &Task,
        new_state: TaskState,
        expected: Option<TaskState>,
    ) -> SchedulerResult<bool> {
        if !self.task_repo.set_state(task.id, new_state, expected).await? {
            debug!(
                "任务 {} 状态未更新: {} -> {} (期望 {:?})",
                task.id, task.state, new_state, expected
            );
            return Ok(false);
        }

        self.after_state_change(task, new_state, expected.unwrap_or(task.state))
            .await;
        Ok(true)
    }

    /// 把任务放回等待队列，运行次数加一
    pub async fn requeue_task(&self, task: &Task, expected: TaskState) -> SchedulerResult<bool> {
        if !self.task_repo.requeue(task.id, expected).await? {
            return Ok(false);
        }
        info!("任务 {} 重新排队 (之前状态 {})", task.id, expected);
        self.after_state_change(task, TaskState::Waiting, expected)
            .await;
        Ok(true)
    }

    /// 所有任务结束且没有进行中的扩展时把作业置为Finished
    ///
    /// 同一作业的并发检查合并为一次执行。
    pub async fn check_and_set_job_finished(&self, job_id: Uuid) -> SchedulerResult<bool> {
        if self.finalize_once(job_id).await? {
            return Ok(true);
        }

        // 合并到的执行可能读到旧的计数，条件满足时再执行一次
        let counts = self.job_repo.get_counts(job_id).await?;
        let active = self.get_job(job_id).await?.is_active();
        if active && counts.is_complete() {
            return self.finalize_once(job_id).await;
        }
        Ok(false)
    }

    async fn finalize_once(&self, job_id: Uuid) -> SchedulerResult<bool> {
        let spec = ClusterLockSpec::combine_lock(format!("job-finalize:{job_id}"))
            .with_timeout(self.config.finalize_lock_timeout);
        let job_repo = self.job_repo.clone();
        let publisher = self.publisher.clone();

        let finished = self
            .lock_executor
            .inline(spec, move || async move {
                let counts = job_repo.get_counts(job_id).await?;
                if !counts.is_complete() {
                    return Ok(false);
                }
                if !job_repo
                    .set_state(job_id, JobState::Finished, Some(JobState::Active))
                    .await?
                {
                    return Ok(false);
                }

                info!(
                    "作业 {} 完成: 成功 {}, 失败 {}, 跳过 {}",
                    job_id,
                    counts.task_states.success,
                    counts.task_states.failure,
                    counts.task_states.skipped
                );
                let event = SchedulerEvent::job_state_change(
                    job_id,
                    JobState::Finished,
                    Some(JobState::Active),
                );
                if let Err(e) = publisher.publish(event).await {
                    warn!("发布作业 {} 完成事件失败: {}", job_id, e);
                }
                Ok(true)
            })
            .await?;

        Ok(finished.unwrap_or(false))
    }

    /// 取消作业，未结束的任务全部跳过，运行中的任务通知Analyst终止
    pub async fn cancel_job(&self, job_id: Uuid) -> SchedulerResult<bool> {
        self.get_job(job_id).await?;
        if !self
            .job_repo
            .set_state(job_id, JobState::Cancelled, Some(JobState::Active))
            .await?
        {
            debug!("作业 {} 不是活动状态，忽略取消", job_id);
            return Ok(false);
        }

        info!("取消作业: {}", job_id);
        self.publish(SchedulerEvent::job_state_change(
            job_id,
            JobState::Cancelled,
            Some(JobState::Active),
        ))
        .await;

        for task in self.task_repo.list_by_job(job_id).await? {
            self.skip_cancelled_task(task).await?;
        }

        Ok(true)
    }

    /// 把已取消作业的任务置为Skipped
    ///
    /// 列出任务之后状态可能已经被派发或回调推进，CAS失败时重新读取并重试，
    /// 直到任务进入终态。
    async fn skip_cancelled_task(&self, mut task: Task) -> SchedulerResult<()> {
        while !task.is_finished() {
            if self
                .set_task_state(&task, TaskState::Skipped, Some(task.state))
                .await?
            {
                if task.is_dispatched() {
                    self.kill(&task, "作业已取消").await;
                }
                return Ok(());
            }

            debug!("任务 {} 状态已变化，重新读取后再取消", task.id);
            match self.task_repo.get(task.id).await? {
                Some(current) => task = current,
                None => return Ok(()),
            }
        }
        Ok(())
    }

    /// 暂停活动作业，`duration`为空时需要手动恢复
    pub async fn pause_job(&self, job_id: Uuid, duration: Option<Duration>) -> SchedulerResult<bool> {
        self.ensure_job_active(job_id).await?;

        let expires = match duration {
            Some(d) => Some(
                chrono::Utc::now()
                    + chrono::Duration::from_std(d)
                        .map_err(|e| SchedulerError::Internal(format!("暂停时长无效: {e}")))?,
            ),
            None => None,
        };
        let paused = self.job_repo.set_paused(job_id, true, expires).await?;
        if paused {
            info!("暂停作业: {} (到期 {:?})", job_id, expires);
        }
        Ok(paused)
    }

    pub async fn resume_job(&self, job_id: Uuid) -> SchedulerResult<bool> {
        self.ensure_job_active(job_id).await?;

        let resumed = self.job_repo.set_paused(job_id, false, None).await?;
        if resumed {
            info!("恢复作业: {}", job_id);
        }
        Ok(resumed)
    }

    /// 恢复暂停期已过的作业
    pub async fn resume_expired_pauses(&self) -> SchedulerResult<usize> {
        self.job_repo.resume_expired_pauses().await
    }

    /// 手动重试单个任务
    pub async fn retry_task(&self, task_id: Uuid) -> SchedulerResult<bool> {
        let task = self.get_task(task_id).await?;
        self.ensure_job_active(task.job_id).await?;

        if !self.set_task_state(&task, TaskState::Waiting, None).await? {
            return Ok(false);
        }
        if task.is_dispatched() {
            self.kill(&task, "任务被手动重试").await;
        }
        info!("手动重试任务: {}", task_id);
        Ok(true)
    }

    /// 手动跳过单个任务
    pub async fn skip_task(&self, task_id: Uuid) -> SchedulerResult<bool> {
        let task = self.get_task(task_id).await?;
        if task.is_finished() {
            return Ok(false);
        }

        if !self.set_task_state(&task, TaskState::Skipped, None).await? {
            return Ok(false);
        }
        if task.is_dispatched() {
            self.kill(&task, "任务被手动跳过").await;
        }
        info!("手动跳过任务: {}", task_id);
        Ok(true)
    }

    /// 重试作业中所有失败的任务，返回重试的数量
    pub async fn retry_all_task_failures(&self, job_id: Uuid) -> SchedulerResult<usize> {
        self.ensure_job_active(job_id).await?;

        let mut retried = 0;
        for task in self
            .task_repo
            .list_by_job_and_state(job_id, TaskState::Failure)
            .await?
        {
            if self
                .set_task_state(&task, TaskState::Waiting, Some(TaskState::Failure))
                .await?
            {
                retried += 1;
            }
        }

        info!("作业 {} 重试了 {} 个失败任务", job_id, retried);
        Ok(retried)
    }

    /// 记录Analyst上报的错误并计入资产计数
    pub async fn record_task_error(
        &self,
        task: &Task,
        endpoint: &str,
        event: &TaskErrorEvent,
    ) -> SchedulerResult<TaskError> {
        let error = TaskError::from_event(task.id, task.job_id, endpoint, event);
        let error = self.task_error_repo.create(&error).await?;

        let delta = if event.fatal {
            AssetCounters::errors(1)
        } else {
            AssetCounters::warnings(1)
        };
        self.task_repo.increment_counters(task.id, &delta).await?;
        Ok(error)
    }

    /// 任务异常退出时为每个资产记录一条致命错误
    pub async fn record_hard_failure(
        &self,
        task: &Task,
        endpoint: &str,
        message: &str,
    ) -> SchedulerResult<usize> {
        let script = self.task_repo.get_script(task.id).await?.unwrap_or_default();

        let mut events = Vec::with_capacity(script.over.len().max(1));
        if script.over.is_empty() {
            events.push(TaskErrorEvent::fatal(message));
        } else {
            for asset in &script.over {
                let mut event = TaskErrorEvent::fatal(message);
                event.asset_id = Some(asset.id);
                event.path = asset.path.clone();
                events.push(event);
            }
        }

        for event in &events {
            let error = TaskError::from_event(task.id, task.job_id, endpoint, event);
            self.task_error_repo.create(&error).await?;
        }
        self.task_repo
            .increment_counters(task.id, &AssetCounters::errors(events.len() as i64))
            .await?;

        warn!("任务 {} 失败: {}，记录 {} 条错误", task.id, message, events.len());
        Ok(events.len())
    }

    async fn ensure_job_active(&self, job_id: Uuid) -> SchedulerResult<()> {
        let job = self.get_job(job_id).await?;
        if !job.is_active() {
            return Err(SchedulerError::JobNotActive {
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    async fn after_state_change(&self, task: &Task, new_state: TaskState, old_state: TaskState) {
        metrics::counter!("archivist.task.state", "state" => new_state.as_str()).increment(1);
        self.publish(SchedulerEvent::task_state_change(
            task.id,
            task.job_id,
            new_state,
            Some(old_state),
        ))
        .await;

        if new_state.is_finished() {
            if let Err(e) = self.check_and_set_job_finished(task.job_id).await {
                error!("检查作业 {} 是否完成时出错: {}", task.job_id, e);
            }
        }
    }

    async fn kill(&self, task: &Task, reason: &str) {
        let Some(host) = task.host.as_deref() else {
            return;
        };
        if let Err(e) = self.transport.kill_task(host, task.id, reason).await {
            warn!("通知 {} 终止任务 {} 失败: {}", host, task.id, e);
        }
    }

    async fn publish(&self, event: SchedulerEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!("发布调度事件失败: {}", e);
        }
    }
}
