//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so tests only spell out the
//! fields they care about.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use archivist_domain::entities::{
    Actor, AnalystSpec, Job, JobSpec, JobState, JobType, PipelineScript, ScriptAsset, Task,
    TaskState, DEFAULT_MAX_RUNNING_TASKS, JOB_PRIORITY_STANDARD,
};

/// Builder for creating test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            job: Job {
                id: Uuid::new_v4(),
                project_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                name: "test_job".to_string(),
                job_type: JobType::Import,
                state: JobState::Active,
                env: Default::default(),
                args: Default::default(),
                max_running_tasks: DEFAULT_MAX_RUNNING_TASKS,
                priority: JOB_PRIORITY_STANDARD,
                paused: false,
                time_pause_expired: None,
                time_created: now,
                time_modified: now,
                time_started: None,
                time_stopped: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.job.state = state;
        self
    }

    pub fn with_max_running_tasks(mut self, max_running_tasks: i32) -> Self {
        self.job.max_running_tasks = max_running_tasks;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    /// Pause the job; with `None` it never resumes on its own
    pub fn paused(mut self, expires: Option<DateTime<Utc>>) -> Self {
        self.job.paused = true;
        self.job.time_pause_expired = expires;
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new(Uuid::new_v4(), Uuid::new_v4(), "test_task"),
        }
    }

    pub fn for_job(mut self, job: &Job) -> Self {
        self.task.job_id = job.id;
        self.task.project_id = job.project_id;
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.task.host = Some(host.to_string());
        self
    }

    pub fn with_run_count(mut self, run_count: i32) -> Self {
        self.task.run_count = run_count;
        self
    }

    pub fn with_time_ping(mut self, time_ping: DateTime<Utc>) -> Self {
        self.task.time_ping = time_ping;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for heartbeat payloads
pub struct AnalystSpecBuilder {
    spec: AnalystSpec,
}

impl AnalystSpecBuilder {
    pub fn new(endpoint: &str) -> Self {
        Self {
            spec: AnalystSpec {
                endpoint: endpoint.to_string(),
                total_ram_mb: 8192,
                free_ram_mb: 4096,
                load: 0.1,
                version: "test".to_string(),
                task_id: None,
            },
        }
    }

    pub fn with_free_ram(mut self, free_ram_mb: i32) -> Self {
        self.spec.free_ram_mb = free_ram_mb;
        self
    }

    pub fn with_load(mut self, load: f32) -> Self {
        self.spec.load = load;
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.spec.task_id = Some(task_id);
        self
    }

    pub fn build(self) -> AnalystSpec {
        self.spec
    }
}

/// Create a test actor with random ids
pub fn create_test_actor() -> Actor {
    Actor::new(Uuid::new_v4(), Uuid::new_v4(), "test_user")
}

/// Create a job spec with `count` scripts named `script-{i}`
pub fn create_test_job_spec(count: usize) -> JobSpec {
    let scripts = (0..count)
        .map(|i| PipelineScript::new(format!("script-{i}")))
        .collect();
    JobSpec::new("test_job", JobType::Import, scripts)
}

/// Create a script covering `count` random assets
pub fn create_test_script_with_assets(name: &str, count: usize) -> PipelineScript {
    let mut script = PipelineScript::new(name);
    script.over = (0..count)
        .map(|i| ScriptAsset {
            id: Uuid::new_v4(),
            path: Some(format!("/data/asset-{i}.jpg")),
        })
        .collect();
    script
}
