use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use archivist_core::{MaintenanceConfig, SchedulerResult};
use archivist_domain::entities::{AnalystState, ClusterLockSpec, Task, TaskErrorEvent, TaskState};
use archivist_domain::repositories::{AnalystRepository, TaskRepository};

use crate::cluster_lock::ClusterLockExecutor;
use crate::job_service::JobService;

/// 维护任务使用的集群锁名称
pub const REAPER_LOCK_NAME: &str = "orphan-reaper";

/// 孤儿任务回收配置
#[derive(Debug, Clone)]
pub struct OrphanReaperConfig {
    /// 检测间隔（秒）
    pub reaper_interval_seconds: u64,
    /// 任务超过该时间没有心跳即视为孤儿（秒）
    pub orphan_time_seconds: i64,
    /// 每轮最多处理的孤儿任务数
    pub orphan_batch_size: usize,
    /// Analyst超过该时间没有心跳标记为Down（秒）
    pub analyst_down_seconds: i64,
    /// Down状态的Analyst超过该时间没有心跳即删除（秒）
    pub analyst_remove_seconds: i64,
}

impl Default for OrphanReaperConfig {
    fn default() -> Self {
        Self {
            reaper_interval_seconds: 30,  // 30秒检测一次
            orphan_time_seconds: 300,     // 5分钟没有心跳
            orphan_batch_size: 15,
            analyst_down_seconds: 120,    // 2分钟后标记为Down
            analyst_remove_seconds: 3600, // 1小时后删除
        }
    }
}

impl From<&MaintenanceConfig> for OrphanReaperConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            reaper_interval_seconds: config.reaper_interval_seconds,
            orphan_time_seconds: config.orphan_time_seconds,
            orphan_batch_size: config.orphan_batch_size,
            analyst_down_seconds: config.analyst_down_seconds,
            analyst_remove_seconds: config.analyst_remove_seconds,
        }
    }
}

/// 一轮维护的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// 重新排队的孤儿任务
    pub requeued: usize,
    /// 超过重试次数被置为Failure的孤儿任务
    pub failed: usize,
    pub analysts_down: usize,
    pub analysts_removed: usize,
    pub locks_cleared: u64,
    /// 暂停期已过而恢复的作业
    pub jobs_resumed: usize,
}

/// 集群维护服务接口
#[async_trait]
pub trait MaintenanceService: Send + Sync {
    /// 启动维护循环
    async fn start(&self) -> SchedulerResult<()>;

    /// 停止维护循环
    async fn stop(&self) -> SchedulerResult<()>;

    /// 执行一轮维护，其他节点正在维护时返回`None`
    async fn run_maintenance(&self) -> SchedulerResult<Option<MaintenanceReport>>;

    /// 回收心跳超时的任务，返回(重新排队数, 失败数)
    async fn reap_orphans(&self) -> SchedulerResult<(usize, usize)>;

    /// 把没有心跳的Analyst标记为Down
    async fn mark_unresponsive_analysts(&self) -> SchedulerResult<usize>;

    /// 删除长时间Down的Analyst
    async fn remove_dead_analysts(&self) -> SchedulerResult<usize>;

    /// 恢复暂停期已过的作业
    async fn resume_paused_jobs(&self) -> SchedulerResult<usize>;
}

/// 孤儿任务回收与Analyst健康检查
pub struct OrphanReaper {
    task_repo: Arc<dyn TaskRepository>,
    analyst_repo: Arc<dyn AnalystRepository>,
    job_service: Arc<JobService>,
    lock_executor: ClusterLockExecutor,
    config: OrphanReaperConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl OrphanReaper {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        analyst_repo: Arc<dyn AnalystRepository>,
        job_service: Arc<JobService>,
        lock_executor: ClusterLockExecutor,
        config: Option<OrphanReaperConfig>,
    ) -> Self {
        Self {
            task_repo,
            analyst_repo,
            job_service,
            lock_executor,
            config: config.unwrap_or_default(),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// 处理单个孤儿任务，返回它的新状态
    async fn handle_orphan(&self, task: &Task) -> SchedulerResult<Option<TaskState>> {
        warn!(
            "检测到孤儿任务: {} (状态 {}, 主机 {:?}, 上次心跳: {})",
            task.id,
            task.state,
            task.host,
            task.time_ping.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let new_state = if self.job_service.is_auto_retryable(task) {
            if !self.job_service.requeue_task(task, task.state).await? {
                return Ok(None);
            }
            TaskState::Waiting
        } else {
            // 错误先落库，作业因该任务失败而结束时错误已经可见
            let endpoint = task.host.as_deref().unwrap_or("unknown");
            let error = TaskErrorEvent::fatal(format!(
                "Task orphaned after {} runs, no heartbeat for {}s",
                task.run_count + 1,
                self.config.orphan_time_seconds
            ));
            self.job_service
                .record_task_error(task, endpoint, &error)
                .await?;
            if !self
                .job_service
                .set_task_state(task, TaskState::Failure, Some(task.state))
                .await?
            {
                return Ok(None);
            }
            TaskState::Failure
        };

        if let Some(host) = task.host.as_deref() {
            if let Some(analyst) = self.analyst_repo.get_by_endpoint(host).await? {
                if analyst.task_id == Some(task.id) {
                    self.analyst_repo.set_task_id(analyst.id, None).await?;
                }
            }
        }

        Ok(Some(new_state))
    }

    async fn maintenance_cycle(&self) -> SchedulerResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let (requeued, failed) = self.reap_orphans().await?;
        report.requeued = requeued;
        report.failed = failed;

        match self.mark_unresponsive_analysts().await {
            Ok(count) => report.analysts_down = count,
            Err(e) => error!("标记无响应Analyst时出错: {}", e),
        }
        match self.remove_dead_analysts().await {
            Ok(count) => report.analysts_removed = count,
            Err(e) => error!("删除离线Analyst时出错: {}", e),
        }
        match self.lock_executor.clear_expired().await {
            Ok(count) => report.locks_cleared = count,
            Err(e) => error!("清理过期集群锁时出错: {}", e),
        }
        match self.resume_paused_jobs().await {
            Ok(count) => report.jobs_resumed = count,
            Err(e) => error!("恢复暂停作业时出错: {}", e),
        }

        Ok(report)
    }

    /// 执行维护循环
    async fn maintenance_loop(&self) -> SchedulerResult<()> {
        info!("启动集群维护循环");

        let interval_duration = Duration::from_secs(self.config.reaper_interval_seconds);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // 多个调度节点同时启动时错开第一次维护
        let jitter_ms = rand::rng().random_range(0..=interval_duration.as_millis() as u64 / 2);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
            _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                info!("收到停止信号，退出集群维护循环");
                return Ok(());
            }
        }

        let mut ticker = tokio::time::interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                    info!("收到停止信号，退出集群维护循环");
                    break;
                }
            }

            match self.run_maintenance().await {
                Ok(Some(report)) if report != MaintenanceReport::default() => {
                    info!(
                        "维护完成: 重新排队 {}, 失败 {}, Analyst下线 {}, 删除 {}, 清理锁 {}, 恢复作业 {}",
                        report.requeued,
                        report.failed,
                        report.analysts_down,
                        report.analysts_removed,
                        report.locks_cleared,
                        report.jobs_resumed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("集群维护时出错: {}", e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MaintenanceService for OrphanReaper {
    async fn start(&self) -> SchedulerResult<()> {
        info!("启动集群维护服务");
        self.maintenance_loop().await
    }

    async fn stop(&self) -> SchedulerResult<()> {
        info!("停止集群维护服务");
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    async fn run_maintenance(&self) -> SchedulerResult<Option<MaintenanceReport>> {
        let spec = ClusterLockSpec::soft_lock(REAPER_LOCK_NAME);
        let Some(handle) = self.lock_executor.obtain_lock(&spec).await? else {
            debug!("其他节点正在执行维护，跳过本轮");
            return Ok(None);
        };

        let report = self.maintenance_cycle().await;

        if let Err(e) = self.lock_executor.release(&spec, &handle).await {
            warn!("释放维护锁失败: {}", e);
        }
        report.map(Some)
    }

    async fn reap_orphans(&self) -> SchedulerResult<(usize, usize)> {
        let orphans = self
            .task_repo
            .get_orphans(
                chrono::Duration::seconds(self.config.orphan_time_seconds),
                self.config.orphan_batch_size,
            )
            .await?;

        let mut requeued = 0;
        let mut failed = 0;
        for task in orphans {
            match self.handle_orphan(&task).await {
                Ok(Some(TaskState::Waiting)) => requeued += 1,
                Ok(Some(_)) => failed += 1,
                Ok(None) => debug!("孤儿任务 {} 状态已变化，跳过", task.id),
                Err(e) => error!("处理孤儿任务 {} 时出错: {}", task.id, e),
            }
        }

        if requeued + failed > 0 {
            metrics::counter!("archivist.orphan.requeued").increment(requeued as u64);
            metrics::counter!("archivist.orphan.failed").increment(failed as u64);
        }
        Ok((requeued, failed))
    }

    async fn mark_unresponsive_analysts(&self) -> SchedulerResult<usize> {
        let analysts = self
            .analyst_repo
            .get_unresponsive(
                AnalystState::Up,
                chrono::Duration::seconds(self.config.analyst_down_seconds),
            )
            .await?;

        let mut count = 0;
        for analyst in analysts {
            if self
                .analyst_repo
                .set_state(analyst.id, AnalystState::Down, AnalystState::Up)
                .await?
            {
                warn!(
                    "Analyst {} 无响应 (上次心跳: {})，标记为Down",
                    analyst.endpoint,
                    analyst.time_ping.format("%Y-%m-%d %H:%M:%S UTC")
                );
                count += 1;
            }
        }
        Ok(count)
    }

    async fn remove_dead_analysts(&self) -> SchedulerResult<usize> {
        let analysts = self
            .analyst_repo
            .get_unresponsive(
                AnalystState::Down,
                chrono::Duration::seconds(self.config.analyst_remove_seconds),
            )
            .await?;

        let mut count = 0;
        for analyst in analysts {
            if self.analyst_repo.delete(analyst.id).await? {
                info!("删除离线Analyst: {}", analyst.endpoint);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn resume_paused_jobs(&self) -> SchedulerResult<usize> {
        self.job_service.resume_expired_pauses().await
    }
}
