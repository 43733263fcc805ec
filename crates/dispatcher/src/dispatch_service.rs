use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use archivist_core::{DispatcherConfig, SchedulerError, SchedulerResult};
use archivist_domain::entities::{
    Analyst, AnalystState, AssetCounters, DispatchTask, Expand, Job, LockState, PipelineScript,
    Task, TaskErrorEvent, TaskEvent, TaskEventPayload, TaskState, TaskStoppedEvent,
};
use archivist_domain::ports::AnalystTransport;
use archivist_domain::repositories::{AnalystRepository, JobRepository, TaskRepository};

use crate::counters::CounterAggregator;
use crate::expansion::TaskExpansion;
use crate::job_service::JobService;

/// 派发服务配置
#[derive(Debug, Clone)]
pub struct DispatchServiceConfig {
    /// 派发间隔（秒）
    pub dispatch_interval_seconds: u64,
    /// 单次派发最多考虑的等待任务数
    pub max_tasks_per_tick: usize,
    /// Analyst至少需要的空闲内存（MB）
    pub min_free_ram_mb: i32,
    /// Analyst负载上限
    pub max_load: f32,
}

impl Default for DispatchServiceConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_seconds: 5, // 5秒派发一次
            max_tasks_per_tick: 50,
            min_free_ram_mb: 256,
            max_load: 0.9,
        }
    }
}

impl From<&DispatcherConfig> for DispatchServiceConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            dispatch_interval_seconds: config.dispatch_interval_seconds,
            max_tasks_per_tick: config.max_tasks_per_tick,
            min_free_ram_mb: config.min_free_ram_mb,
            max_load: config.max_load,
        }
    }
}

/// 一轮派发的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: usize,
    /// 在CAS上输给其他调度节点或达到作业并发上限
    pub collided: usize,
    /// 推送到Analyst失败后回滚
    pub failed: usize,
}

/// 派发服务接口
#[async_trait]
pub trait DispatchServiceTrait: Send + Sync {
    /// 启动派发循环
    async fn start(&self) -> SchedulerResult<()>;

    /// 停止派发循环
    async fn stop(&self) -> SchedulerResult<()>;

    /// 执行一轮派发
    async fn dispatch_tick(&self) -> SchedulerResult<DispatchStats>;

    /// 处理Analyst上报的任务事件
    async fn handle_event(&self, event: &TaskEvent) -> SchedulerResult<()>;

    /// 等待派发的任务数
    async fn pending_task_count(&self) -> SchedulerResult<u64>;
}

/// 把等待中的任务推送给空闲的Analyst，并处理任务生命周期回调
pub struct DispatchService {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    analyst_repo: Arc<dyn AnalystRepository>,
    transport: Arc<dyn AnalystTransport>,
    job_service: Arc<JobService>,
    expansion: Arc<TaskExpansion>,
    config: DispatchServiceConfig,
    counters: CounterAggregator,
    shutdown_tx: watch::Sender<bool>,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        analyst_repo: Arc<dyn AnalystRepository>,
        transport: Arc<dyn AnalystTransport>,
        job_service: Arc<JobService>,
        expansion: Arc<TaskExpansion>,
        counters: CounterAggregator,
        config: Option<DispatchServiceConfig>,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            analyst_repo,
            transport,
            job_service,
            expansion,
            config: config.unwrap_or_default(),
            counters,
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// 锁定Analyst后尝试把任务推送给它，结束时总会释放Analyst锁
    async fn dispatch_to(&self, task: &Task, analyst: &Analyst) -> SchedulerResult<DispatchOutcome> {
        if !self
            .analyst_repo
            .set_lock(analyst.id, LockState::Locked, LockState::Unlocked)
            .await?
        {
            debug!("Analyst {} 已被其他调度节点锁定", analyst.endpoint);
            return Ok(DispatchOutcome::AnalystBusy);
        }

        // 列出Analyst之后它可能已经接到了其他节点派发的任务
        let outcome = match self.analyst_repo.get(analyst.id).await {
            Ok(Some(current)) if current.task_id.is_none() && current.state == AnalystState::Up => {
                self.queue_and_push(task, analyst).await
            }
            Ok(_) => Ok(DispatchOutcome::AnalystBusy),
            Err(e) => Err(e),
        };

        if let Err(e) = self
            .analyst_repo
            .set_lock(analyst.id, LockState::Unlocked, LockState::Locked)
            .await
        {
            error!("释放Analyst {} 的锁失败: {}", analyst.endpoint, e);
        }
        outcome
    }

    async fn queue_and_push(&self, task: &Task, analyst: &Analyst) -> SchedulerResult<DispatchOutcome> {
        let Some(job) = self.job_repo.get(task.job_id).await? else {
            warn!("任务 {} 所属作业 {} 不存在", task.id, task.job_id);
            return Ok(DispatchOutcome::TaskTaken);
        };

        if !self
            .job_service
            .set_task_state(task, TaskState::Queued, Some(TaskState::Waiting))
            .await?
        {
            return Ok(DispatchOutcome::TaskTaken);
        }

        // 任务已经是Queued，之后任何一步失败都要回滚
        match self.assign_and_push(task, analyst, &job).await {
            Ok(()) => {
                info!("任务 {} 已派发到 {}", task.id, analyst.endpoint);
                Ok(DispatchOutcome::Dispatched)
            }
            Err(e) => {
                warn!("推送任务 {} 到 {} 失败: {}", task.id, analyst.endpoint, e);
                self.rollback(task, analyst).await;
                Ok(DispatchOutcome::Failed)
            }
        }
    }

    async fn assign_and_push(&self, task: &Task, analyst: &Analyst, job: &Job) -> SchedulerResult<()> {
        if !self.task_repo.set_host(task.id, Some(&analyst.endpoint)).await? {
            return Err(SchedulerError::task_not_found(task.id));
        }
        if !self.analyst_repo.set_task_id(analyst.id, Some(task.id)).await? {
            return Err(SchedulerError::analyst_not_found(analyst.id));
        }

        let script = self
            .task_repo
            .get_script(task.id)
            .await?
            .unwrap_or_else(|| PipelineScript::new(task.name.clone()));
        let mut queued = task.clone();
        queued.state = TaskState::Queued;
        queued.host = Some(analyst.endpoint.clone());
        let payload = DispatchTask::new(queued, job, script);

        self.transport.dispatch(&analyst.endpoint, &payload).await
    }

    /// 投递失败后把任务放回Waiting，不计入运行次数
    async fn rollback(&self, task: &Task, analyst: &Analyst) {
        match self
            .job_service
            .set_task_state(task, TaskState::Waiting, Some(TaskState::Queued))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("回滚任务 {} 时状态已变化", task.id),
            Err(e) => error!("回滚任务 {} 失败: {}", task.id, e),
        }
        if let Err(e) = self.analyst_repo.set_task_id(analyst.id, None).await {
            error!("清除Analyst {} 的任务失败: {}", analyst.endpoint, e);
        }
    }

    /// 任务开始运行
    pub async fn start_task(&self, task_id: Uuid, endpoint: &str) -> SchedulerResult<bool> {
        let task = self.job_service.get_task(task_id).await?;
        if !task.is_hosted_by(endpoint) {
            warn!("{} 报告启动任务 {}，但任务不属于它", endpoint, task_id);
            return Ok(false);
        }

        let started = self
            .job_service
            .set_task_state(&task, TaskState::Running, Some(TaskState::Queued))
            .await?;
        if started {
            self.task_repo.reset_counters(task_id).await?;
            info!("任务 {} 在 {} 上开始运行", task_id, endpoint);
        }
        Ok(started)
    }

    /// 任务停止运行，根据退出码决定新状态
    pub async fn stop_task(
        &self,
        task_id: Uuid,
        endpoint: &str,
        event: &TaskStoppedEvent,
    ) -> SchedulerResult<bool> {
        let task = self.job_service.get_task(task_id).await?;
        if !task.is_hosted_by(endpoint) {
            warn!("{} 报告停止任务 {}，但任务不属于它", endpoint, task_id);
            return Ok(false);
        }

        let new_state = match event.new_state {
            Some(state) => state,
            None if event.exit_status == 0 => TaskState::Success,
            None if !event.manual_kill && self.job_service.is_auto_retryable(&task) => {
                TaskState::Waiting
            }
            None => TaskState::Failure,
        };

        let mut stopped = false;
        for expected in [TaskState::Running, TaskState::Queued] {
            if !expected.can_transition_to(new_state) {
                continue;
            }
            stopped = if new_state == TaskState::Waiting {
                self.job_service.requeue_task(&task, expected).await?
            } else {
                self.job_service
                    .set_task_state(&task, new_state, Some(expected))
                    .await?
            };
            if stopped {
                break;
            }
        }

        if !stopped {
            debug!("任务 {} 已不在运行，忽略停止事件", task_id);
            return Ok(false);
        }

        self.task_repo.set_exit_status(task_id, event.exit_status).await?;
        self.release_analyst(endpoint, task_id).await?;

        if new_state == TaskState::Failure && !event.manual_kill && event.exit_status != 0 {
            let message = format!("Hard task failure, exit {}", event.exit_status);
            self.job_service
                .record_hard_failure(&task, endpoint, &message)
                .await?;
        }

        info!(
            "任务 {} 停止: 退出码 {}, 新状态 {}",
            task_id, event.exit_status, new_state
        );
        Ok(true)
    }

    pub async fn handle_task_error(
        &self,
        task_id: Uuid,
        endpoint: &str,
        event: &TaskErrorEvent,
    ) -> SchedulerResult<()> {
        let task = self.job_service.get_task(task_id).await?;
        self.job_service
            .record_task_error(&task, endpoint, event)
            .await?;
        Ok(())
    }

    /// 累加Analyst上报的资产计数，只接受当前持有任务的Analyst
    pub async fn update_counters(
        &self,
        task_id: Uuid,
        endpoint: &str,
        delta: &AssetCounters,
    ) -> SchedulerResult<bool> {
        let task = self.job_service.get_task(task_id).await?;
        if !task.is_dispatched() || !task.is_hosted_by(endpoint) {
            debug!("{} 上报任务 {} 的计数，但任务不在它上面运行", endpoint, task_id);
            return Ok(false);
        }
        self.counters.increment(task_id, delta).await
    }

    pub async fn update_progress(&self, task_id: Uuid, progress: i32) -> SchedulerResult<bool> {
        self.task_repo.set_progress(task_id, progress).await
    }

    pub async fn update_status(&self, task_id: Uuid, status: &str) -> SchedulerResult<bool> {
        self.task_repo.set_status(task_id, status).await
    }

    async fn release_analyst(&self, endpoint: &str, task_id: Uuid) -> SchedulerResult<()> {
        if let Some(analyst) = self.analyst_repo.get_by_endpoint(endpoint).await? {
            if analyst.task_id == Some(task_id) {
                self.analyst_repo.set_task_id(analyst.id, None).await?;
            }
        }
        Ok(())
    }

    /// 执行派发循环
    async fn dispatch_loop(&self) -> SchedulerResult<()> {
        info!("启动任务派发循环");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.dispatch_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                    info!("收到停止信号，退出任务派发循环");
                    break;
                }
            }

            match self.dispatch_tick().await {
                Ok(stats) if stats.dispatched > 0 || stats.failed > 0 => {
                    info!(
                        "本轮派发 {} 个任务，冲突 {}，失败 {}",
                        stats.dispatched, stats.collided, stats.failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("派发任务时出错: {}", e),
            }
        }

        Ok(())
    }
}

enum DispatchOutcome {
    Dispatched,
    /// Analyst锁被其他节点持有，换下一个Analyst
    AnalystBusy,
    /// 任务已被其他节点取走或作业已满，换下一个任务
    TaskTaken,
    Failed,
}

#[async_trait]
impl DispatchServiceTrait for DispatchService {
    async fn start(&self) -> SchedulerResult<()> {
        info!("启动任务派发服务");
        self.dispatch_loop().await
    }

    async fn stop(&self) -> SchedulerResult<()> {
        info!("停止任务派发服务");
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    async fn dispatch_tick(&self) -> SchedulerResult<DispatchStats> {
        let mut stats = DispatchStats::default();

        let analysts = self
            .analyst_repo
            .list_available(self.config.min_free_ram_mb, self.config.max_load)
            .await?;
        if analysts.is_empty() {
            debug!("没有空闲的Analyst");
            return Ok(stats);
        }

        let tasks = self
            .task_repo
            .get_waiting(self.config.max_tasks_per_tick)
            .await?;
        if tasks.is_empty() {
            return Ok(stats);
        }

        let mut analysts = analysts.iter();
        let mut tasks = tasks.iter();
        let mut analyst = analysts.next();
        let mut task = tasks.next();

        while let (Some(t), Some(a)) = (task, analyst) {
            match self.dispatch_to(t, a).await? {
                DispatchOutcome::Dispatched => {
                    stats.dispatched += 1;
                    task = tasks.next();
                    analyst = analysts.next();
                }
                DispatchOutcome::AnalystBusy => {
                    stats.collided += 1;
                    analyst = analysts.next();
                }
                DispatchOutcome::TaskTaken => {
                    stats.collided += 1;
                    task = tasks.next();
                }
                DispatchOutcome::Failed => {
                    stats.failed += 1;
                    task = tasks.next();
                    analyst = analysts.next();
                }
            }
        }

        metrics::counter!("archivist.dispatch.dispatched").increment(stats.dispatched as u64);
        Ok(stats)
    }

    async fn handle_event(&self, event: &TaskEvent) -> SchedulerResult<()> {
        let endpoint = event.endpoint.as_str();
        match &event.event {
            TaskEventPayload::Started => {
                self.start_task(event.task_id, endpoint).await?;
            }
            TaskEventPayload::Stopped(stopped) => {
                self.stop_task(event.task_id, endpoint, stopped).await?;
            }
            TaskEventPayload::Error(error) => {
                self.handle_task_error(event.task_id, endpoint, error).await?;
            }
            TaskEventPayload::Expand { script } => {
                let expand = Expand {
                    endpoint: endpoint.to_string(),
                    job_id: event.job_id,
                    task_id: event.task_id,
                    script: script.clone(),
                };
                self.expansion.expand(&expand).await?;
            }
            TaskEventPayload::Stats(delta) => {
                self.update_counters(event.task_id, endpoint, delta).await?;
            }
            TaskEventPayload::Progress { progress } => {
                self.update_progress(event.task_id, *progress).await?;
            }
            TaskEventPayload::Status { status } => {
                self.update_status(event.task_id, status).await?;
            }
            TaskEventPayload::Message { message } => {
                info!("任务 {} ({}): {}", event.task_id, endpoint, message);
            }
        }
        Ok(())
    }

    async fn pending_task_count(&self) -> SchedulerResult<u64> {
        self.task_repo.count_pending().await
    }
}
