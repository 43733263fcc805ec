use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::{ClusterLock, ClusterLockSpec, LockStatus};
use archivist_domain::repositories::ClusterLockRepository;

use super::MemoryStore;

/// 内存集群锁仓储，单进程部署时使用
#[derive(Clone)]
pub struct MemoryClusterLockRepository {
    store: MemoryStore,
}

impl MemoryClusterLockRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClusterLockRepository for MemoryClusterLockRepository {
    async fn lock(&self, spec: &ClusterLockSpec, owner: &str) -> SchedulerResult<LockStatus> {
        let timeout = chrono::Duration::from_std(spec.timeout)
            .map_err(|e| SchedulerError::Internal(format!("锁超时时间无效: {e}")))?;

        let mut state = self.store.lock().await;
        let now = Utc::now();

        if let Some(existing) = state.locks.get(&spec.name) {
            if !existing.is_expired(now) {
                return Ok(LockStatus::Wait);
            }
            debug!("集群锁 {} 已过期，原持有者: {}", spec.name, existing.owner);
        }

        state.locks.insert(
            spec.name.clone(),
            ClusterLock {
                name: spec.name.clone(),
                owner: owner.to_string(),
                time_locked: now,
                time_expired: now + timeout,
            },
        );
        Ok(LockStatus::Locked)
    }

    async fn unlock(&self, name: &str, owner: &str) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        match state.locks.get(name) {
            Some(lock) if lock.owner == owner => {
                state.locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, name: &str) -> SchedulerResult<bool> {
        let state = self.store.lock().await;
        let now = Utc::now();
        Ok(state.locks.get(name).is_some_and(|l| !l.is_expired(now)))
    }

    async fn clear_expired(&self) -> SchedulerResult<u64> {
        let mut state = self.store.lock().await;
        let now = Utc::now();
        let before = state.locks.len();
        state.locks.retain(|_, l| !l.is_expired(now));
        Ok((before - state.locks.len()) as u64)
    }
}
