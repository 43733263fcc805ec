use async_trait::async_trait;
use uuid::Uuid;

use archivist_core::SchedulerResult;
use archivist_domain::entities::TaskError;
use archivist_domain::repositories::TaskErrorRepository;

use super::MemoryStore;

/// 内存任务错误仓储，按写入顺序保存
#[derive(Clone)]
pub struct MemoryTaskErrorRepository {
    store: MemoryStore,
}

impl MemoryTaskErrorRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskErrorRepository for MemoryTaskErrorRepository {
    async fn create(&self, error: &TaskError) -> SchedulerResult<TaskError> {
        let mut state = self.store.lock().await;
        state.task_errors.push(error.clone());
        Ok(error.clone())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<TaskError>> {
        let state = self.store.lock().await;
        Ok(state.task_errors.iter().find(|e| e.id == id).cloned())
    }

    async fn list_by_job(&self, job_id: Uuid) -> SchedulerResult<Vec<TaskError>> {
        let state = self.store.lock().await;
        Ok(state
            .task_errors
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_by_task(&self, task_id: Uuid) -> SchedulerResult<Vec<TaskError>> {
        let state = self.store.lock().await;
        Ok(state
            .task_errors
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        let before = state.task_errors.len();
        state.task_errors.retain(|e| e.id != id);
        Ok(state.task_errors.len() < before)
    }
}
