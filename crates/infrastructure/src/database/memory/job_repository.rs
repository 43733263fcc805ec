use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::{AssetCounters, Job, JobCounts, JobState, TaskStateCounts};
use archivist_domain::repositories::JobRepository;

use super::{JobRecord, MemoryStore};

/// 内存作业仓储
#[derive(Clone)]
pub struct MemoryJobRepository {
    store: MemoryStore,
}

impl MemoryJobRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, job: &Job) -> SchedulerResult<Job> {
        let mut state = self.store.lock().await;
        state.jobs.insert(
            job.id,
            JobRecord {
                job: job.clone(),
                task_states: TaskStateCounts::default(),
                counters: AssetCounters::default(),
                pending_expands: 0,
            },
        );
        debug!("创建作业: {} ({})", job.name, job.id);
        Ok(job.clone())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Job>> {
        let state = self.store.lock().await;
        Ok(state.jobs.get(&id).map(|r| r.job.clone()))
    }

    async fn list(&self, filter: Option<JobState>) -> SchedulerResult<Vec<Job>> {
        let state = self.store.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|r| filter.map_or(true, |s| r.job.state == s))
            .map(|r| r.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.time_created);
        Ok(jobs)
    }

    async fn set_state(
        &self,
        id: Uuid,
        new_state: JobState,
        expected: Option<JobState>,
    ) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        let record = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::job_not_found(id))?;

        if let Some(expected) = expected {
            if record.job.state != expected {
                return Ok(false);
            }
            if !expected.can_transition_to(new_state) {
                return Err(SchedulerError::invalid_transition(expected, new_state));
            }
        }

        let now = Utc::now();
        record.job.state = new_state;
        record.job.time_modified = now;
        match new_state {
            JobState::Active => record.job.time_stopped = None,
            JobState::Cancelled | JobState::Finished => record.job.time_stopped = Some(now),
        }
        Ok(true)
    }

    async fn get_task_state_counts(&self, id: Uuid) -> SchedulerResult<TaskStateCounts> {
        let state = self.store.lock().await;
        state
            .jobs
            .get(&id)
            .map(|r| r.task_states)
            .ok_or_else(|| SchedulerError::job_not_found(id))
    }

    async fn get_counts(&self, id: Uuid) -> SchedulerResult<JobCounts> {
        let state = self.store.lock().await;
        let record = state
            .jobs
            .get(&id)
            .ok_or_else(|| SchedulerError::job_not_found(id))?;
        Ok(JobCounts {
            task_states: record.task_states,
            asset_counters: record.counters,
            max_running_tasks: record.job.max_running_tasks,
            pending_expands: record.pending_expands,
        })
    }

    async fn increment_pending_expands(&self, id: Uuid, delta: i32) -> SchedulerResult<i32> {
        let mut state = self.store.lock().await;
        let record = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::job_not_found(id))?;
        record.pending_expands = (record.pending_expands + delta).max(0);
        Ok(record.pending_expands)
    }

    async fn set_paused(
        &self,
        id: Uuid,
        paused: bool,
        expires: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool> {
        let mut state = self.store.lock().await;
        let record = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::job_not_found(id))?;

        let job = &mut record.job;
        if !job.is_active() || job.paused == paused {
            return Ok(false);
        }
        job.paused = paused;
        job.time_pause_expired = if paused { expires } else { None };
        job.time_modified = Utc::now();
        Ok(true)
    }

    async fn resume_expired_pauses(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let mut state = self.store.lock().await;

        let mut resumed = 0;
        for record in state.jobs.values_mut() {
            let job = &mut record.job;
            if job.is_active() && job.pause_expired(now) {
                job.paused = false;
                job.time_pause_expired = None;
                job.time_modified = now;
                info!("作业 {} 暂停期已过，恢复派发", job.id);
                resumed += 1;
            }
        }
        Ok(resumed)
    }
}
