use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use archivist_dispatcher::{
    ClusterLockExecutor, ClusterLockExecutorConfig, CounterAggregator, DispatchService,
    DispatchServiceTrait, HeartbeatHandler, JobService, MaintenanceService, OrphanReaper,
    TaskExpansion,
};
use archivist_domain::entities::{
    JobState, PipelineScript, TaskEvent, TaskEventPayload, TaskState, TaskStoppedEvent,
};
use archivist_domain::events::SchedulerEvent;
use archivist_domain::repositories::{JobRepository, TaskRepository};
use archivist_infrastructure::MemoryRepositories;
use archivist_testing_utils::{
    create_test_actor, create_test_job_spec, AnalystSpecBuilder, MockAnalystTransport,
    RecordingEventPublisher,
};

/// 一个调度节点，多个节点可以共享同一组仓储
struct Node {
    job_service: Arc<JobService>,
    dispatch: Arc<DispatchService>,
    heartbeat: HeartbeatHandler,
    reaper: OrphanReaper,
}

fn node(
    name: &str,
    repos: &MemoryRepositories,
    transport: &Arc<MockAnalystTransport>,
    publisher: &Arc<RecordingEventPublisher>,
) -> Node {
    let lock_executor = ClusterLockExecutor::new(
        repos.cluster_locks.clone(),
        name,
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
        expansion,
        CounterAggregator::new(repos.tasks.clone(), repos.jobs.clone()),
        None,
    ));
    Node {
        heartbeat: HeartbeatHandler::new(repos.analysts.clone(), repos.tasks.clone()),
        reaper: OrphanReaper::new(
            repos.tasks.clone(),
            repos.analysts.clone(),
            job_service.clone(),
            lock_executor,
            None,
        ),
        job_service,
        dispatch,
    }
}

fn event(task_id: uuid::Uuid, job_id: uuid::Uuid, endpoint: &str, payload: TaskEventPayload) -> TaskEvent {
    TaskEvent {
        task_id,
        job_id,
        endpoint: endpoint.to_string(),
        event: payload,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cas_has_single_winner() {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let node = node("n1", &repos, &transport, &publisher);

    let job = node
        .job_service
        .create_job(&create_test_actor(), &create_test_job_spec(1))
        .await
        .unwrap();
    let task = node.job_service.list_tasks(job.id).await.unwrap().remove(0);
    publisher.clear();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let job_service = node.job_service.clone();
            let task = task.clone();
            tokio::spawn(async move {
                job_service
                    .set_task_state(&task, TaskState::Queued, Some(TaskState::Waiting))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(publisher.count(), 1);

    let counts = repos.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.task_states.queued, 1);
    assert_eq!(counts.task_states.waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_nodes_never_double_dispatch() {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let first = node("n1", &repos, &transport, &publisher);
    let second = node("n2", &repos, &transport, &publisher);

    first
        .job_service
        .create_job(&create_test_actor(), &create_test_job_spec(5))
        .await
        .unwrap();
    for endpoint in ["http://a1:8080", "http://a2:8080"] {
        first
            .heartbeat
            .handle_ping(&AnalystSpecBuilder::new(endpoint).build())
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(first.dispatch.dispatch_tick(), second.dispatch.dispatch_tick());
    let dispatched = a.unwrap().dispatched + b.unwrap().dispatched;
    assert_eq!(dispatched, 2);

    // 每个任务只被推送一次，每个Analyst只收到一个任务
    let sent = transport.dispatched();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].0, sent[1].0);
    assert_ne!(sent[0].1.task.id, sent[1].1.task.id);
    assert_eq!(first.dispatch.pending_task_count().await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalization_publishes_once() {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let node = node("n1", &repos, &transport, &publisher);

    let job = node
        .job_service
        .create_job(&create_test_actor(), &create_test_job_spec(8))
        .await
        .unwrap();
    let tasks = node.job_service.list_tasks(job.id).await.unwrap();

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let job_service = node.job_service.clone();
            tokio::spawn(async move {
                job_service
                    .set_task_state(&task, TaskState::Skipped, Some(TaskState::Waiting))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let job = node.job_service.get_job(job.id).await.unwrap();
    assert_eq!(job.state, JobState::Finished);

    let finished_events = publisher
        .events()
        .into_iter()
        .filter(|e| {
            matches!(e, SchedulerEvent::JobStateChange(change) if change.new_state == JobState::Finished)
        })
        .count();
    assert_eq!(finished_events, 1);
}

#[tokio::test]
async fn test_job_lifecycle_with_retry_and_expansion() {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let node = node("n1", &repos, &transport, &publisher);
    let a1 = "http://a1:8080";
    let a2 = "http://a2:8080";

    let job = node
        .job_service
        .create_job(&create_test_actor(), &create_test_job_spec(2))
        .await
        .unwrap();
    for endpoint in [a1, a2] {
        node.heartbeat
            .handle_ping(&AnalystSpecBuilder::new(endpoint).build())
            .await
            .unwrap();
    }

    assert_eq!(node.dispatch.dispatch_tick().await.unwrap().dispatched, 2);
    let sent = transport.dispatched();
    let (first_endpoint, first) = (&sent[0].0, sent[0].1.task.clone());
    let (second_endpoint, second) = (&sent[1].0, sent[1].1.task.clone());

    for (endpoint, task) in [(first_endpoint, &first), (second_endpoint, &second)] {
        node.dispatch
            .handle_event(&event(task.id, job.id, endpoint, TaskEventPayload::Started))
            .await
            .unwrap();
    }

    // 第一个任务运行中扩展出一个新任务
    node.dispatch
        .handle_event(&event(
            first.id,
            job.id,
            first_endpoint,
            TaskEventPayload::Expand {
                script: PipelineScript::new("expanded"),
            },
        ))
        .await
        .unwrap();
    assert_eq!(node.dispatch.pending_task_count().await.unwrap(), 1);

    // 第一个任务成功，第二个任务异常退出后重新排队
    node.dispatch
        .handle_event(&event(
            first.id,
            job.id,
            first_endpoint,
            TaskEventPayload::Stopped(TaskStoppedEvent::exited(0)),
        ))
        .await
        .unwrap();
    node.dispatch
        .handle_event(&event(
            second.id,
            job.id,
            second_endpoint,
            TaskEventPayload::Stopped(TaskStoppedEvent::exited(1)),
        ))
        .await
        .unwrap();

    let retried = repos.tasks.get(second.id).await.unwrap().unwrap();
    assert_eq!(retried.state, TaskState::Waiting);
    assert_eq!(retried.run_count, 1);
    assert_eq!(node.dispatch.pending_task_count().await.unwrap(), 2);

    // 心跳里不再带任务，两个Analyst重新空闲
    for endpoint in [a1, a2] {
        node.heartbeat
            .handle_ping(&AnalystSpecBuilder::new(endpoint).build())
            .await
            .unwrap();
    }
    assert_eq!(node.dispatch.dispatch_tick().await.unwrap().dispatched, 2);

    let sent = transport.dispatched();
    for (endpoint, payload) in &sent[2..] {
        let task_id = payload.task.id;
        node.dispatch.start_task(task_id, endpoint).await.unwrap();
        node.dispatch
            .stop_task(task_id, endpoint, &TaskStoppedEvent::exited(0))
            .await
            .unwrap();
    }

    let job = node.job_service.get_job(job.id).await.unwrap();
    assert_eq!(job.state, JobState::Finished);
    let counts = repos.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.task_states.success, 3);
    assert_eq!(counts.task_states.total(), 3);

    // 维护不会再找到孤儿任务
    let report = node.reaper.run_maintenance().await.unwrap().unwrap();
    assert_eq!(report.requeued + report.failed, 0);
}

#[tokio::test]
async fn test_silent_analyst_task_moves_to_another_analyst() {
    let repos = MemoryRepositories::new();
    let transport = Arc::new(MockAnalystTransport::new());
    let publisher = Arc::new(RecordingEventPublisher::new());
    let node = node("n1", &repos, &transport, &publisher);
    let a1 = "http://a1:8080";
    let a2 = "http://a2:8080";

    let job = node
        .job_service
        .create_job(&create_test_actor(), &create_test_job_spec(3))
        .await
        .unwrap();
    let t1 = node.job_service.list_tasks(job.id).await.unwrap()[0].clone();

    node.heartbeat
        .handle_ping(&AnalystSpecBuilder::new(a1).build())
        .await
        .unwrap();
    assert_eq!(node.dispatch.dispatch_tick().await.unwrap().dispatched, 1);
    assert_eq!(transport.dispatched_to(a1)[0].task.id, t1.id);
    assert!(node.dispatch.start_task(t1.id, a1).await.unwrap());

    // A1失联：任务心跳停在5分钟之前，A1负载过高不再接收任务
    repos
        .tasks
        .set_ping_time(t1.id, chrono::Utc::now() - chrono::Duration::seconds(301))
        .await
        .unwrap();
    node.heartbeat
        .handle_ping(&AnalystSpecBuilder::new(a1).with_load(0.99).build())
        .await
        .unwrap();

    assert_eq!(node.reaper.reap_orphans().await.unwrap(), (1, 0));
    let requeued = repos.tasks.get(t1.id).await.unwrap().unwrap();
    assert_eq!(requeued.state, TaskState::Waiting);
    assert_eq!(requeued.run_count, 1);
    assert!(requeued.counters.is_zero());

    node.heartbeat
        .handle_ping(&AnalystSpecBuilder::new(a2).build())
        .await
        .unwrap();
    assert_eq!(node.dispatch.dispatch_tick().await.unwrap().dispatched, 1);
    assert_eq!(transport.dispatched_to(a2)[0].task.id, t1.id);

    assert!(repos
        .tasks
        .set_state(t1.id, TaskState::Running, Some(TaskState::Queued))
        .await
        .unwrap());
    assert!(repos
        .tasks
        .set_state(t1.id, TaskState::Success, Some(TaskState::Running))
        .await
        .unwrap());

    let counts = repos.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.task_states.success, 1);
    assert_eq!(counts.task_states.waiting, 2);
}
