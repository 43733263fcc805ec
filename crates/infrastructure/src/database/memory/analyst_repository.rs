use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::{Analyst, AnalystSpec, AnalystState, LockState};
use archivist_domain::repositories::AnalystRepository;

use super::MemoryStore;

/// 内存Analyst仓储
#[derive(Clone)]
pub struct MemoryAnalystRepository {
    store: MemoryStore,
}

impl MemoryAnalystRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// 直接改写心跳时间，用于测试失联判定
    pub async fn set_ping_time(&self, id: Uuid, time: DateTime<Utc>) -> SchedulerResult<()> {
        let mut state = self.store.lock().await;
        let analyst = state
            .analysts
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::analyst_not_found(id))?;
        analyst.time_ping = time;
        Ok(())
    }
}

#[async_trait]
impl AnalystRepository for MemoryAnalystRepository {
    async fn upsert(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst> {
        let mut state = self.store.lock().await;
        let now = Utc::now();

        if let Some(existing) = state
            .analysts
            .values_mut()
            .find(|a| a.endpoint == spec.endpoint)
        {
            existing.refresh(spec, now);
            return Ok(existing.clone());
        }

        let analyst = Analyst::from_spec(spec);
        debug!("注册新Analyst: {} ({})", analyst.endpoint, analyst.id);
        state.analysts.insert(analyst.id, analyst.clone());
        Ok(analyst)
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Analyst>> {
        let state = self.store.lock().await;
        Ok(state.analysts.get(&id).cloned())
    }

    async fn get_by_endpoint(&self, endpoint: &str) -> SchedulerResult<Option<Analyst>> {
        let state = self.store.lock().await;
        Ok(state
            .analysts
            .values()
            .find(|a| a.endpoint == endpoint)
            .cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<Analyst>> {
        let state = self.store.lock().await;
        let mut analysts: Vec<Analyst> = state.analysts.values().cloned().collect();
        analysts.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(analysts)
    }

    async fn list_available(
        &self,
        min_free_ram_mb: i32,
        max_load: f32,
    ) -> SchedulerResult<Vec<Analyst>> {
        let state = self.store.lock().await;
        let mut analysts: Vec<Analyst> = state
            .analysts
            .values()
            .filter(|a| a.is_available(min_free_ram_mb, max_load))
            .cloned()
            .collect();
        analysts.sort_by(|a, b| {
            b.free_ram_mb
                .cmp(&a.free_ram_mb)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        Ok(analysts)
    }

    async fn set_lock(
        &self,
        id: Uuid,
        new_state: LockState,
        expected: LockState,
    ) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.analysts.get_mut(&id) {
            Some(analyst) if analyst.lock == expected => {
                analyst.lock = new_state;
                true
            }
            _ => false,
        })
    }

    async fn set_task_id(&self, id: Uuid, task_id: Option<Uuid>) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.analysts.get_mut(&id) {
            Some(analyst) => {
                analyst.task_id = task_id;
                true
            }
            None => false,
        })
    }

    async fn set_state(
        &self,
        id: Uuid,
        new_state: AnalystState,
        expected: AnalystState,
    ) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.analysts.get_mut(&id) {
            Some(analyst) if analyst.state == expected => {
                analyst.state = new_state;
                if new_state == AnalystState::Down {
                    analyst.task_id = None;
                }
                true
            }
            _ => false,
        })
    }

    async fn get_unresponsive(
        &self,
        analyst_state: AnalystState,
        max_silence: Duration,
    ) -> SchedulerResult<Vec<Analyst>> {
        let cutoff = Utc::now() - max_silence;
        let state = self.store.lock().await;
        Ok(state
            .analysts
            .values()
            .filter(|a| a.state == analyst_state && a.time_ping < cutoff)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(state.analysts.remove(&id).is_some())
    }
}
