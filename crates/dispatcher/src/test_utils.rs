use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use archivist_domain::entities::{Job, Task, TaskState};
use archivist_domain::repositories::TaskRepository;
use archivist_infrastructure::MemoryRepositories;
use archivist_testing_utils::{
    create_test_actor, create_test_job_spec, MockAnalystTransport, RecordingEventPublisher,
};

use crate::cluster_lock::{ClusterLockExecutor, ClusterLockExecutorConfig};
use crate::counters::CounterAggregator;
use crate::dispatch_service::DispatchService;
use crate::expansion::TaskExpansion;
use crate::heartbeat::HeartbeatHandler;
use crate::job_service::JobService;
use crate::orphan_reaper::OrphanReaper;

/// 基于内存仓储组装的全部服务
pub struct TestContext {
    pub repos: MemoryRepositories,
    pub transport: Arc<MockAnalystTransport>,
    pub publisher: Arc<RecordingEventPublisher>,
    pub lock_executor: ClusterLockExecutor,
    pub job_service: Arc<JobService>,
    pub expansion: Arc<TaskExpansion>,
    pub dispatch: Arc<DispatchService>,
    pub heartbeat: Arc<HeartbeatHandler>,
    pub reaper: Arc<OrphanReaper>,
}

impl TestContext {
    pub fn new() -> Self {
        let repos = MemoryRepositories::new();
        let transport = Arc::new(MockAnalystTransport::new());
        let publisher = Arc::new(RecordingEventPublisher::new());

        let lock_executor = ClusterLockExecutor::new(
            repos.cluster_locks.clone(),
            "test-node",
            Handle::current(),
            Some(ClusterLockExecutorConfig {
                backoff_step: Duration::from_millis(5),
                backoff_max: Duration::from_millis(20),
            }),
        );

        let job_service = Arc::new(JobService::new(
            repos.jobs.clone(),
            repos.tasks.clone(),
            repos.task_errors.clone(),
            transport.clone(),
            publisher.clone(),
            lock_executor.clone(),
            None,
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
            transport.clone(),
            job_service.clone(),
            expansion.clone(),
            CounterAggregator::new(repos.tasks.clone(), repos.jobs.clone()),
            None,
        ));
        let heartbeat = Arc::new(HeartbeatHandler::new(
            repos.analysts.clone(),
            repos.tasks.clone(),
        ));
        let reaper = Arc::new(OrphanReaper::new(
            repos.tasks.clone(),
            repos.analysts.clone(),
            job_service.clone(),
            lock_executor.clone(),
            None,
        ));

        Self {
            repos,
            transport,
            publisher,
            lock_executor,
            job_service,
            expansion,
            dispatch,
            heartbeat,
            reaper,
        }
    }

    /// 创建一个有`count`个等待任务的作业
    pub async fn job_with_tasks(&self, count: usize) -> (Job, Vec<Task>) {
        let job = self
            .job_service
            .create_job(&create_test_actor(), &create_test_job_spec(count))
            .await
            .unwrap();
        let tasks = self.job_service.list_tasks(job.id).await.unwrap();
        (job, tasks)
    }

    /// 用指定的任务仓储组装作业服务，其余依赖与上下文共享
    pub fn job_service_with(&self, task_repo: Arc<dyn TaskRepository>) -> JobService {
        JobService::new(
            self.repos.jobs.clone(),
            task_repo,
            self.repos.task_errors.clone(),
            self.transport.clone(),
            self.publisher.clone(),
            self.lock_executor.clone(),
            None,
        )
    }

    /// 绕过派发直接让等待中的任务在`endpoint`上运行
    pub async fn run_task(&self, task: &Task, endpoint: &str) -> Task {
        let tasks = &self.repos.tasks;
        assert!(tasks
            .set_state(task.id, TaskState::Queued, Some(TaskState::Waiting))
            .await
            .unwrap());
        tasks.set_host(task.id, Some(endpoint)).await.unwrap();
        assert!(tasks
            .set_state(task.id, TaskState::Running, Some(TaskState::Queued))
            .await
            .unwrap());
        tasks.get(task.id).await.unwrap().unwrap()
    }
}
