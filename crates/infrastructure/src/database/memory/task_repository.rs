use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::{AssetCounters, JobState, PipelineScript, Task, TaskState};
use archivist_domain::repositories::TaskRepository;

use super::{MemoryStore, StoreState, TaskRecord};

/// 内存任务仓储
#[derive(Clone)]
pub struct MemoryTaskRepository {
    store: MemoryStore,
}

impl MemoryTaskRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// 直接改写心跳时间，用于回放历史数据和测试孤儿判定
    pub async fn set_ping_time(&self, id: Uuid, time: DateTime<Utc>) -> SchedulerResult<()> {
        let mut state = self.store.lock().await;
        let record = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        record.task.time_ping = time;
        Ok(())
    }
}

/// 在持锁状态下执行一次条件状态更新
fn apply_state(
    state: &mut StoreState,
    id: Uuid,
    new_state: TaskState,
    expected: Option<TaskState>,
) -> SchedulerResult<bool> {
    let (current, job_id) = match state.tasks.get(&id) {
        Some(record) => (record.task.state, record.task.job_id),
        None => return Err(SchedulerError::task_not_found(id)),
    };

    // 期望状态过期时不检查状态边，只返回false
    if let Some(expected) = expected {
        if expected != current {
            return Ok(false);
        }
        if !expected.can_transition_to(new_state) {
            return Err(SchedulerError::invalid_transition(expected, new_state));
        }
    }

    let job = state
        .jobs
        .get_mut(&job_id)
        .ok_or_else(|| SchedulerError::job_not_found(job_id))?;

    // 作业并发上限
    if new_state.is_dispatched()
        && !current.is_dispatched()
        && job.task_states.dispatched() >= job.job.max_running_tasks as i64
    {
        debug!(
            "作业 {} 已达到并发上限 {}，拒绝任务 {} 进入 {}",
            job_id, job.job.max_running_tasks, id, new_state
        );
        return Ok(false);
    }

    let now = Utc::now();
    job.task_states.shift(current, new_state);
    job.job.time_modified = now;
    if new_state == TaskState::Running && job.job.time_started.is_none() {
        job.job.time_started = Some(now);
    }

    let task = match state.tasks.get_mut(&id) {
        Some(record) => &mut record.task,
        None => return Err(SchedulerError::task_not_found(id)),
    };
    task.state = new_state;
    match new_state {
        TaskState::Waiting => {
            task.time_started = None;
            task.time_stopped = None;
            task.progress = 0;
            task.host = None;
            task.exit_status = None;
        }
        TaskState::Queued => {
            task.time_ping = now;
        }
        TaskState::Running => {
            task.time_ping = now;
            task.time_started = Some(now);
            task.time_stopped = None;
        }
        TaskState::Success | TaskState::Failure | TaskState::Skipped => {
            task.time_stopped = Some(now);
            task.progress = 100;
        }
    }

    Ok(true)
}

/// 任务计数清零并从作业汇总中扣减
fn clear_counters(state: &mut StoreState, id: Uuid) -> SchedulerResult<()> {
    let record = state
        .tasks
        .get_mut(&id)
        .ok_or_else(|| SchedulerError::task_not_found(id))?;
    let counters = std::mem::take(&mut record.task.counters);
    let job_id = record.task.job_id;
    if let Some(job) = state.jobs.get_mut(&job_id) {
        job.counters -= counters;
    }
    Ok(())
}

/// 活动且未暂停作业的优先级
fn dispatch_priority(state: &StoreState, job_id: Uuid) -> Option<i32> {
    state
        .jobs
        .get(&job_id)
        .filter(|j| j.job.is_dispatchable())
        .map(|j| j.job.priority)
}

fn is_job_active(state: &StoreState, job_id: Uuid) -> bool {
    state
        .jobs
        .get(&job_id)
        .is_some_and(|j| j.job.state == JobState::Active)
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task, script: &PipelineScript) -> SchedulerResult<Task> {
        let mut state = self.store.lock().await;
        let job = state
            .jobs
            .get_mut(&task.job_id)
            .ok_or_else(|| SchedulerError::job_not_found(task.job_id))?;
        job.task_states.increment(task.state);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(
            task.id,
            TaskRecord {
                task: task.clone(),
                script: script.clone(),
                seq,
            },
        );
        Ok(task.clone())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let state = self.store.lock().await;
        Ok(state.tasks.get(&id).map(|r| r.task.clone()))
    }

    async fn get_script(&self, id: Uuid) -> SchedulerResult<Option<PipelineScript>> {
        let state = self.store.lock().await;
        Ok(state.tasks.get(&id).map(|r| r.script.clone()))
    }

    async fn list_by_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>> {
        let state = self.store.lock().await;
        let mut records: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|r| r.task.job_id == job_id)
            .collect();
        records.sort_by_key(|r| r.seq);
        Ok(records.into_iter().map(|r| r.task.clone()).collect())
    }

    async fn list_by_job_and_state(
        &self,
        job_id: Uuid,
        task_state: TaskState,
    ) -> SchedulerResult<Vec<Task>> {
        let state = self.store.lock().await;
        let mut records: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|r| r.task.job_id == job_id && r.task.state == task_state)
            .collect();
        records.sort_by_key(|r| r.seq);
        Ok(records.into_iter().map(|r| r.task.clone()).collect())
    }

    async fn get_waiting(&self, limit: usize) -> SchedulerResult<Vec<Task>> {
        let state = self.store.lock().await;
        let mut records: Vec<(i32, &TaskRecord)> = state
            .tasks
            .values()
            .filter(|r| r.task.state == TaskState::Waiting)
            .filter_map(|r| dispatch_priority(&state, r.task.job_id).map(|p| (p, r)))
            .collect();
        records.sort_by_key(|(priority, r)| (*priority, r.task.time_created, r.seq));
        Ok(records
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.task.clone())
            .collect())
    }

    async fn set_state(
        &self,
        id: Uuid,
        new_state: TaskState,
        expected: Option<TaskState>,
    ) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        apply_state(&mut state, id, new_state, expected)
    }

    async fn requeue(&self, id: Uuid, expected: TaskState) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        if !apply_state(&mut state, id, TaskState::Waiting, Some(expected))? {
            return Ok(false);
        }

        clear_counters(&mut state, id)?;
        if let Some(record) = state.tasks.get_mut(&id) {
            record.task.run_count += 1;
        }
        Ok(true)
    }

    async fn set_host(&self, id: Uuid, host: Option<&str>) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.tasks.get_mut(&id) {
            Some(record) => {
                record.task.host = host.map(str::to_string);
                true
            }
            None => false,
        })
    }

    async fn update_ping_time(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.tasks.get_mut(&id) {
            Some(record)
                if record.task.state == TaskState::Running
                    && record.task.is_hosted_by(endpoint) =>
            {
                record.task.time_ping = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn get_orphans(&self, max_silence: Duration, limit: usize) -> SchedulerResult<Vec<Task>> {
        let cutoff = Utc::now() - max_silence;
        let state = self.store.lock().await;
        let mut orphans: Vec<Task> = state
            .tasks
            .values()
            .filter(|r| r.task.is_dispatched() && r.task.time_ping < cutoff)
            .map(|r| r.task.clone())
            .collect();
        orphans.sort_by_key(|t| t.time_ping);
        orphans.truncate(limit);
        Ok(orphans)
    }

    async fn set_exit_status(&self, id: Uuid, exit_status: i32) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.tasks.get_mut(&id) {
            Some(record) => {
                record.task.exit_status = Some(exit_status);
                true
            }
            None => false,
        })
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.tasks.get_mut(&id) {
            Some(record) => {
                record.task.progress = progress.clamp(0, 100);
                true
            }
            None => false,
        })
    }

    async fn set_status(&self, id: Uuid, status: &str) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        Ok(match state.tasks.get_mut(&id) {
            Some(record) => {
                record.task.status = Some(status.to_string());
                true
            }
            None => false,
        })
    }

    async fn increment_counters(&self, id: Uuid, delta: &AssetCounters) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        let job_id = match state.tasks.get_mut(&id) {
            Some(record) => {
                record.task.counters += *delta;
                record.task.job_id
            }
            None => return Ok(false),
        };
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.counters += *delta;
        }
        Ok(true)
    }

    async fn reset_counters(&self, id: Uuid) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        if !state.tasks.contains_key(&id) {
            return Ok(false);
        }
        clear_counters(&mut state, id)?;
        Ok(true)
    }

    async fn count_pending(&self) -> SchedulerResult<u64> {
        let state = self.store.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|r| r.task.state == TaskState::Waiting && is_job_active(&state, r.task.job_id))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryJobRepository;
    use archivist_domain::repositories::JobRepository;
    use archivist_testing_utils::builders::{JobBuilder, TaskBuilder};

    async fn setup(max_running: i32, tasks: usize) -> (MemoryJobRepository, MemoryTaskRepository, Vec<Task>) {
        let store = MemoryStore::new();
        let jobs = MemoryJobRepository::new(store.clone());
        let repo = MemoryTaskRepository::new(store);
        let job = jobs
            .create(&JobBuilder::new().with_max_running_tasks(max_running).build())
            .await
            .unwrap();

        let mut created = Vec::new();
        for i in 0..tasks {
            let task = TaskBuilder::new()
                .for_job(&job)
                .with_name(&format!("task-{i}"))
                .build();
            created.push(repo.create(&task, &PipelineScript::new("s")).await.unwrap());
        }
        (jobs, repo, created)
    }

    #[tokio::test]
    async fn test_set_state_cas() {
        let (_, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;

        // 期望状态不符，返回false且不修改
        assert!(!repo
            .set_state(id, TaskState::Running, Some(TaskState::Queued))
            .await
            .unwrap());
        assert_eq!(repo.get(id).await.unwrap().unwrap().state, TaskState::Waiting);

        assert!(repo
            .set_state(id, TaskState::Queued, Some(TaskState::Waiting))
            .await
            .unwrap());
        // 重复执行同一个CAS只会成功一次
        assert!(!repo
            .set_state(id, TaskState::Queued, Some(TaskState::Waiting))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_illegal_edge_is_error() {
        let (_, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;
        repo.set_state(id, TaskState::Success, None).await.unwrap();

        let result = repo
            .set_state(id, TaskState::Running, Some(TaskState::Success))
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidStateTransition { .. })
        ));
        assert_eq!(repo.get(id).await.unwrap().unwrap().state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_stale_expectation_on_illegal_edge_returns_false() {
        let (_, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;

        // 任务仍是Waiting，Success -> Running 的期望已经过期
        assert!(!repo
            .set_state(id, TaskState::Running, Some(TaskState::Success))
            .await
            .unwrap());
        assert_eq!(repo.get(id).await.unwrap().unwrap().state, TaskState::Waiting);
    }

    #[tokio::test]
    async fn test_side_effects() {
        let (jobs, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;

        repo.set_state(id, TaskState::Queued, Some(TaskState::Waiting)).await.unwrap();
        repo.set_host(id, Some("http://a:5000")).await.unwrap();
        repo.set_state(id, TaskState::Running, Some(TaskState::Queued)).await.unwrap();
        let running = repo.get(id).await.unwrap().unwrap();
        assert!(running.time_started.is_some());
        assert!(running.time_stopped.is_none());

        repo.set_state(id, TaskState::Success, Some(TaskState::Running)).await.unwrap();
        let done = repo.get(id).await.unwrap().unwrap();
        assert_eq!(done.progress, 100);
        assert!(done.time_stopped.is_some());

        let counts = jobs.get_task_state_counts(done.job_id).await.unwrap();
        assert_eq!(counts.success, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn test_admission_ceiling() {
        let (_, repo, tasks) = setup(1, 2).await;

        assert!(repo
            .set_state(tasks[0].id, TaskState::Queued, Some(TaskState::Waiting))
            .await
            .unwrap());
        // 作业已有一个派发中的任务
        assert!(!repo
            .set_state(tasks[1].id, TaskState::Queued, Some(TaskState::Waiting))
            .await
            .unwrap());
        // 派发集合内部的迁移不受限制
        assert!(repo
            .set_state(tasks[0].id, TaskState::Running, Some(TaskState::Queued))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_requeue_increments_run_count_and_resets_counters() {
        let (jobs, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;

        repo.set_state(id, TaskState::Queued, Some(TaskState::Waiting)).await.unwrap();
        repo.set_state(id, TaskState::Running, Some(TaskState::Queued)).await.unwrap();
        repo.increment_counters(
            id,
            &AssetCounters {
                created: 5,
                replaced: 1,
                errors: 1,
                warnings: 2,
            },
        )
        .await
        .unwrap();

        assert!(repo.requeue(id, TaskState::Running).await.unwrap());
        let task = repo.get(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Waiting);
        assert_eq!(task.run_count, 1);
        assert!(task.counters.is_zero());
        assert!(task.host.is_none());

        let counts = jobs.get_counts(task.job_id).await.unwrap();
        assert!(counts.asset_counters.is_zero());

        // 已经是Waiting，再次requeue失败
        assert!(!repo.requeue(id, TaskState::Running).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_ping_time_requires_host_and_running() {
        let (_, repo, tasks) = setup(10, 1).await;
        let id = tasks[0].id;

        repo.set_state(id, TaskState::Queued, Some(TaskState::Waiting)).await.unwrap();
        repo.set_host(id, Some("http://a:5000")).await.unwrap();
        // Queued状态不接受心跳
        assert!(!repo.update_ping_time(id, "http://a:5000").await.unwrap());

        repo.set_state(id, TaskState::Running, Some(TaskState::Queued)).await.unwrap();
        assert!(repo.update_ping_time(id, "http://a:5000").await.unwrap());
        assert!(!repo.update_ping_time(id, "http://b:5000").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_waiting_is_fifo_and_skips_inactive_jobs() {
        let (jobs, repo, tasks) = setup(10, 3).await;

        let waiting = repo.get_waiting(10).await.unwrap();
        let ids: Vec<Uuid> = waiting.iter().map(|t| t.id).collect();
        assert_eq!(ids, tasks.iter().map(|t| t.id).collect::<Vec<_>>());
        assert_eq!(repo.get_waiting(2).await.unwrap().len(), 2);
        assert_eq!(repo.count_pending().await.unwrap(), 3);

        jobs.set_state(tasks[0].job_id, JobState::Cancelled, Some(JobState::Active))
            .await
            .unwrap();
        assert!(repo.get_waiting(10).await.unwrap().is_empty());
        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_waiting_orders_by_priority_and_skips_paused() {
        let store = MemoryStore::new();
        let jobs = MemoryJobRepository::new(store.clone());
        let repo = MemoryTaskRepository::new(store);

        let standard = jobs.create(&JobBuilder::new().build()).await.unwrap();
        let urgent = jobs
            .create(&JobBuilder::new().with_priority(1).build())
            .await
            .unwrap();
        let paused = jobs
            .create(&JobBuilder::new().with_priority(-10).paused(None).build())
            .await
            .unwrap();

        let mut ids = Vec::new();
        for job in [&standard, &urgent, &paused] {
            let task = TaskBuilder::new().for_job(job).build();
            ids.push(repo.create(&task, &PipelineScript::new("s")).await.unwrap().id);
        }

        let waiting: Vec<Uuid> = repo
            .get_waiting(10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(waiting, vec![ids[1], ids[0]]);

        jobs.set_paused(paused.id, false, None).await.unwrap();
        let waiting = repo.get_waiting(10).await.unwrap();
        assert_eq!(waiting[0].id, ids[2]);
    }
}
