use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use archivist_core::{ClusterLockConfig, SchedulerError, SchedulerResult};
use archivist_domain::entities::{ClusterLockSpec, LockStatus};
use archivist_domain::repositories::ClusterLockRepository;

type CombinedOutput = Result<Arc<dyn Any + Send + Sync>, SchedulerError>;
type CombinedFuture = Shared<BoxFuture<'static, CombinedOutput>>;

/// 集群锁执行器配置
#[derive(Debug, Clone)]
pub struct ClusterLockExecutorConfig {
    /// 首次等待时间，之后每次增加同样的量
    pub backoff_step: Duration,
    pub backoff_max: Duration,
}

impl Default for ClusterLockExecutorConfig {
    fn default() -> Self {
        Self {
            backoff_step: Duration::from_millis(100), // 100ms起步
            backoff_max: Duration::from_secs(10),     // 最多等待10秒再重试
        }
    }
}

impl From<&ClusterLockConfig> for ClusterLockExecutorConfig {
    fn from(config: &ClusterLockConfig) -> Self {
        Self {
            backoff_step: Duration::from_millis(config.backoff_step_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// 一次成功加锁的凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub holder: String,
}

/// 在集群锁保护下执行代码
///
/// 持有者标识由节点ID加随机后缀组成，同一进程内的两次加锁互斥。
#[derive(Clone)]
pub struct ClusterLockExecutor {
    repo: Arc<dyn ClusterLockRepository>,
    node_id: String,
    handle: Handle,
    config: ClusterLockExecutorConfig,
    inflight: Arc<Mutex<HashMap<String, CombinedFuture>>>,
}

impl ClusterLockExecutor {
    pub fn new(
        repo: Arc<dyn ClusterLockRepository>,
        node_id: impl Into<String>,
        handle: Handle,
        config: Option<ClusterLockExecutorConfig>,
    ) -> Self {
        Self {
            repo,
            node_id: node_id.into(),
            handle,
            config: config.unwrap_or_default(),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 按锁策略反复尝试加锁
    ///
    /// 软锁次数用尽返回`Ok(None)`，硬锁等待超过`spec.timeout`返回`LockTimeout`。
    pub async fn obtain_lock(&self, spec: &ClusterLockSpec) -> SchedulerResult<Option<LockHandle>> {
        let holder = format!("{}:{}", self.node_id, Uuid::new_v4());
        let started = Instant::now();
        let mut tries = 0;
        let mut backoff = self.config.backoff_step;

        loop {
            match self.repo.lock(spec, &holder).await? {
                LockStatus::Locked => {
                    debug!("获取集群锁 {} 成功，尝试次数: {}", spec.name, tries + 1);
                    return Ok(Some(LockHandle {
                        name: spec.name.clone(),
                        holder,
                    }));
                }
                LockStatus::Wait => {
                    tries += 1;
                    metrics::counter!("archivist.cluster_lock.wait", "lock" => spec.name.clone())
                        .increment(1);

                    if !spec.is_unbounded() && tries >= spec.max_tries {
                        debug!("集群锁 {} 被占用，放弃获取 (尝试 {} 次)", spec.name, tries);
                        return Ok(None);
                    }

                    let mut wait = backoff;
                    if spec.is_unbounded() {
                        let elapsed = started.elapsed();
                        if elapsed >= spec.timeout {
                            warn!("等待集群锁 {} 超时 ({:?})", spec.name, spec.timeout);
                            return Err(SchedulerError::LockTimeout {
                                name: spec.name.clone(),
                            });
                        }
                        wait = wait.min(spec.timeout - elapsed);
                    }

                    tokio::time::sleep(wait).await;
                    backoff = (backoff + self.config.backoff_step).min(self.config.backoff_max);
                }
            }
        }
    }

    /// 释放锁，`hold_till_timeout`的锁保留到自然过期
    pub async fn release(&self, spec: &ClusterLockSpec, handle: &LockHandle) -> SchedulerResult<bool> {
        if spec.hold_till_timeout {
            return Ok(false);
        }
        self.repo.unlock(&handle.name, &handle.holder).await
    }

    /// 获取锁后在当前任务中执行`body`
    ///
    /// 返回`Ok(None)`表示软锁未获取，`body`没有执行。合并锁的调用方
    /// 若遇到同名执行正在进行，直接等待并共享其结果。
    pub async fn inline<T, F, Fut>(&self, spec: ClusterLockSpec, body: F) -> SchedulerResult<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SchedulerResult<T>> + Send + 'static,
    {
        if spec.combine_multiple {
            self.run_combined(spec, body).await
        } else {
            self.run_locked(&spec, body).await
        }
    }

    /// 与`inline`相同，但在执行器的运行时上异步执行
    pub fn submit<T, F, Fut>(
        &self,
        spec: ClusterLockSpec,
        body: F,
    ) -> JoinHandle<SchedulerResult<Option<T>>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SchedulerResult<T>> + Send + 'static,
    {
        let this = self.clone();
        self.handle.spawn(async move { this.inline(spec, body).await })
    }

    pub async fn is_locked(&self, name: &str) -> SchedulerResult<bool> {
        self.repo.is_locked(name).await
    }

    pub async fn clear_expired(&self) -> SchedulerResult<u64> {
        self.repo.clear_expired().await
    }

    async fn run_locked<T, F, Fut>(&self, spec: &ClusterLockSpec, body: F) -> SchedulerResult<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let Some(handle) = self.obtain_lock(spec).await? else {
            return Ok(None);
        };

        let result = body().await;

        if let Err(e) = self.release(spec, &handle).await {
            warn!("释放集群锁 {} 失败: {}", spec.name, e);
        }

        result.map(Some)
    }

    async fn run_combined<T, F, Fut>(&self, spec: ClusterLockSpec, body: F) -> SchedulerResult<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SchedulerResult<T>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&spec.name) {
                Some(existing) => {
                    debug!("合并到正在执行的 {}", spec.name);
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let name = spec.name.clone();
                    let future: BoxFuture<'static, CombinedOutput> = async move {
                        let output = this.run_locked(&spec, body).await;
                        this.inflight.lock().await.remove(&spec.name);
                        output.map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
                    }
                    .boxed();
                    let shared = future.shared();
                    inflight.insert(name, shared.clone());
                    shared
                }
            }
        };

        let value = shared.await?;
        value
            .downcast_ref::<Option<T>>()
            .cloned()
            .ok_or_else(|| SchedulerError::Internal("合并锁结果类型不匹配".to_string()))
    }
}
