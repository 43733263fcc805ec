//! 内存仓储实现
//!
//! 所有仓储共享一个`MemoryStore`，每次操作在同一把锁内完成，
//! 等价于数据库中单条条件UPDATE语句的原子性。

mod analyst_repository;
mod cluster_lock_repository;
mod job_repository;
mod task_error_repository;
mod task_repository;

pub use analyst_repository::MemoryAnalystRepository;
pub use cluster_lock_repository::MemoryClusterLockRepository;
pub use job_repository::MemoryJobRepository;
pub use task_error_repository::MemoryTaskErrorRepository;
pub use task_repository::MemoryTaskRepository;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use archivist_domain::entities::{
    Analyst, AssetCounters, ClusterLock, Job, PipelineScript, Task, TaskError, TaskStateCounts,
};

pub(crate) struct JobRecord {
    pub job: Job,
    pub task_states: TaskStateCounts,
    pub counters: AssetCounters,
    pub pending_expands: i32,
}

pub(crate) struct TaskRecord {
    pub task: Task,
    pub script: PipelineScript,
    /// 插入顺序，创建时间相同时保证先进先出
    pub seq: u64,
}

#[derive(Default)]
pub(crate) struct StoreState {
    pub jobs: HashMap<Uuid, JobRecord>,
    pub tasks: HashMap<Uuid, TaskRecord>,
    pub analysts: HashMap<Uuid, Analyst>,
    pub task_errors: Vec<TaskError>,
    pub locks: HashMap<String, ClusterLock>,
    pub next_seq: u64,
}

/// 共享的内存存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }
}

/// 基于同一个存储的全部仓储
#[derive(Clone)]
pub struct MemoryRepositories {
    pub store: MemoryStore,
    pub jobs: Arc<MemoryJobRepository>,
    pub tasks: Arc<MemoryTaskRepository>,
    pub analysts: Arc<MemoryAnalystRepository>,
    pub task_errors: Arc<MemoryTaskErrorRepository>,
    pub cluster_locks: Arc<MemoryClusterLockRepository>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        Self {
            jobs: Arc::new(MemoryJobRepository::new(store.clone())),
            tasks: Arc::new(MemoryTaskRepository::new(store.clone())),
            analysts: Arc::new(MemoryAnalystRepository::new(store.clone())),
            task_errors: Arc::new(MemoryTaskErrorRepository::new(store.clone())),
            cluster_locks: Arc::new(MemoryClusterLockRepository::new(store.clone())),
            store,
        }
    }
}

impl Default for MemoryRepositories {
    fn default() -> Self {
        Self::new()
    }
}
