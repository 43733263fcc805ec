use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use archivist_api::{create_app, AppState};
use archivist_core::AppConfig;
use archivist_dispatcher::{
    ClusterLockExecutor, ClusterLockExecutorConfig, CounterAggregator, DispatchService,
    DispatchServiceConfig, DispatchServiceTrait, HeartbeatHandler, JobService, JobServiceConfig,
    MaintenanceService, OrphanReaper, OrphanReaperConfig, TaskExpansion,
};
use archivist_domain::DomainEvent;
use archivist_infrastructure::{BroadcastEventBus, HttpAnalystClient, MemoryRepositories};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行派发与维护循环
    Scheduler,
    /// 仅运行API服务器
    Api,
    /// 运行所有组件
    All,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduler" => Ok(AppMode::Scheduler),
            "api" => Ok(AppMode::Api),
            "all" => Ok(AppMode::All),
            other => Err(anyhow::anyhow!("无效的运行模式: {other}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    node_id: String,
    repos: MemoryRepositories,
    event_bus: Arc<BroadcastEventBus>,
    job_service: Arc<JobService>,
    expansion: Arc<TaskExpansion>,
    dispatch: Arc<DispatchService>,
    heartbeat: Arc<HeartbeatHandler>,
    reaper: Arc<OrphanReaper>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    /// 组装仓储、Analyst客户端与各调度服务
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        let node_id = node_id();
        info!("初始化应用程序，模式: {:?}，节点: {}", mode, node_id);

        let metrics_handle = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标记录器失败")?;
            Some(handle)
        } else {
            None
        };

        let repos = MemoryRepositories::new();
        let event_bus = Arc::new(BroadcastEventBus::new(None));
        let transport = Arc::new(
            HttpAnalystClient::new(&config.transport).context("创建Analyst客户端失败")?,
        );

        let lock_executor = ClusterLockExecutor::new(
            repos.cluster_locks.clone(),
            node_id.clone(),
            Handle::current(),
            Some(ClusterLockExecutorConfig::from(&config.cluster_lock)),
        );

        let job_config = JobServiceConfig {
            finalize_lock_timeout: Duration::from_secs(config.cluster_lock.default_timeout_seconds),
            ..JobServiceConfig::from(&config.maintenance)
        };
        let job_service = Arc::new(JobService::new(
            repos.jobs.clone(),
            repos.tasks.clone(),
            repos.task_errors.clone(),
            transport.clone(),
            event_bus.clone(),
            lock_executor.clone(),
            Some(job_config),
        ));
        let expansion = Arc::new(TaskExpansion::new(
            repos.jobs.clone(),
            repos.tasks.clone(),
            job_service.clone(),
        ));
        let dispatch = Arc::new(DispatchService::new(
            repos.jobs.clone(),
            repos.tasks.clone(),
            repos.analysts.clone(),
            transport,
            job_service.clone(),
            expansion.clone(),
            CounterAggregator::new(repos.tasks.clone(), repos.jobs.clone()),
            Some(DispatchServiceConfig::from(&config.dispatcher)),
        ));
        let heartbeat = Arc::new(HeartbeatHandler::new(
            repos.analysts.clone(),
            repos.tasks.clone(),
        ));
        let reaper = Arc::new(OrphanReaper::new(
            repos.tasks.clone(),
            repos.analysts.clone(),
            job_service.clone(),
            lock_executor,
            Some(OrphanReaperConfig::from(&config.maintenance)),
        ));

        Ok(Self {
            config,
            mode,
            node_id,
            repos,
            event_bus,
            job_service,
            expansion,
            dispatch,
            heartbeat,
            reaper,
            metrics_handle,
        })
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let events_handle = self.spawn_event_logger(shutdown_rx.resubscribe());

        let result = match self.mode {
            AppMode::Scheduler => self.run_scheduler(shutdown_rx).await,
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::All => {
                let (scheduler, api) = tokio::join!(
                    self.run_scheduler(shutdown_rx.resubscribe()),
                    self.run_api(shutdown_rx)
                );
                scheduler.and(api)
            }
        };

        let _ = events_handle.await;
        result
    }

    /// 派发循环与维护循环
    async fn run_scheduler(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let dispatch_handle = if self.config.dispatcher.enabled {
            let dispatch = Arc::clone(&self.dispatch);
            Some(tokio::spawn(async move {
                if let Err(e) = dispatch.start().await {
                    error!("任务派发服务异常退出: {}", e);
                }
            }))
        } else {
            warn!("任务派发已在配置中禁用");
            None
        };

        let maintenance_handle = if self.config.maintenance.enabled {
            let reaper = Arc::clone(&self.reaper);
            Some(tokio::spawn(async move {
                if let Err(e) = reaper.start().await {
                    error!("维护服务异常退出: {}", e);
                }
            }))
        } else {
            warn!("孤儿任务回收已在配置中禁用");
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("调度循环收到关闭信号，节点: {}", self.node_id);

        if let Err(e) = self.dispatch.stop().await {
            error!("停止任务派发服务失败: {}", e);
        }
        if let Err(e) = self.reaper.stop().await {
            error!("停止维护服务失败: {}", e);
        }

        for handle in [dispatch_handle, maintenance_handle].into_iter().flatten() {
            let _ = handle.await;
        }

        info!("调度循环已停止");
        Ok(())
    }

    /// API服务器，收到关闭信号后优雅退出
    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.api.enabled {
            warn!("API服务器已在配置中禁用");
            return Ok(());
        }

        let state = AppState {
            job_service: Arc::clone(&self.job_service),
            dispatch: Arc::clone(&self.dispatch),
            expansion: Arc::clone(&self.expansion),
            heartbeat: Arc::clone(&self.heartbeat),
            analyst_repo: self.repos.analysts.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };
        let app = create_app(
            state,
            &self.config.api,
            &self.config.observability.metrics_endpoint,
        );

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定API地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器监听: {}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    /// 把事件总线上的状态变化输出到日志
    fn spawn_event_logger(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut events = self.event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => match event {
                        Ok(event) => debug!(
                            "事件: {} {}",
                            event.event_type(),
                            event.aggregate_id()
                        ),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("事件日志落后，丢弃了 {} 个事件", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

/// 集群锁持有者标识，主机名不可用时退回随机ID
fn node_id() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            let fallback = format!("archivist-{}", uuid::Uuid::new_v4());
            warn!("获取主机名失败，使用 {}: {}", fallback, e);
            fallback
        }
    }
}
