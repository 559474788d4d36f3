use std::sync::Arc;
use std::time::Duration;

use anomaly_core::{
    DetectionTaskInfo, NewTask, PlanNodeSpec, SchedulerResult, Task, TaskInfo, TaskResult,
    TaskStatus, TaskStore, TaskType, WorkerConfig, WorkerIdentity,
};
use anomaly_infrastructure::InMemoryTaskStore;
use anomaly_pipeline::PlanExecutor;
use anomaly_testing_utils::mocks::{CONSTANT, FAILING, RECORDING, SLEEP};
use anomaly_testing_utils::{scripted_registry, InvocationLog, PlanNodeSpecBuilder, TaskBuilder};
use anomaly_worker::{
    DetectionTaskRunner, LeaseRecovery, TaskContext, TaskDriver, TaskRunner, TaskRunnerRegistry,
};
use async_trait::async_trait;
use serde_json::json;

fn test_config() -> WorkerConfig {
    WorkerConfig {
        id: Some(1),
        max_parallel_tasks: 2,
        no_task_delay_ms: 20,
        random_delay_cap_ms: 10,
        task_failure_delay_ms: 20,
        max_task_run_time_ms: 5_000,
        heartbeat_interval_ms: 50,
        stale_lease_threshold_ms: 500,
        shutdown_timeout_ms: 2_000,
        ..WorkerConfig::default()
    }
}

fn runners(log: &InvocationLog) -> Arc<TaskRunnerRegistry> {
    let executor = PlanExecutor::new(Arc::new(scripted_registry(log)), 2);
    Arc::new(
        TaskRunnerRegistry::new()
            .with_runner(TaskType::Detection, Arc::new(DetectionTaskRunner::new(executor))),
    )
}

fn detection(job_name: &str, nodes: Vec<PlanNodeSpec>) -> NewTask {
    let info = DetectionTaskInfo {
        alert_id: 1,
        start: 0,
        end: 60_000,
        nodes,
        root: "root".to_string(),
    };
    NewTask::new(
        TaskType::Detection,
        job_name,
        TaskInfo::Detection(info).to_value().unwrap(),
    )
}

async fn wait_for_terminal(store: &dyn TaskStore, id: i64) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = store.get_by_id(id).await.unwrap().unwrap();
        if task.is_finished() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "任务 {id} 未在期限内结束: {:?}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_detection_task_completes() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "complete",
            vec![
                PlanNodeSpecBuilder::new("fetcher", RECORDING).build(),
                PlanNodeSpecBuilder::new("root", RECORDING)
                    .depends_on("fetcher")
                    .build(),
            ],
        ))
        .await
        .unwrap();

    let driver = TaskDriver::new(test_config(), store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.worker_id, Some(1));
    assert!(finished.status_message.is_none());
    assert!(finished.end_time.is_some());
    assert_eq!(log.calls(), vec!["fetcher", "root"]);
}

#[tokio::test]
async fn test_long_task_times_out() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "slow",
            vec![PlanNodeSpecBuilder::new("root", SLEEP)
                .param("sleepMs", json!(5_000))
                .build()],
        ))
        .await
        .unwrap();

    let config = WorkerConfig {
        max_task_run_time_ms: 100,
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;

    assert_eq!(finished.status, TaskStatus::Timeout);
    assert!(finished.status_message.as_ref().unwrap().contains("100ms"));
    let elapsed = finished.execution_duration_ms().unwrap();
    assert!(elapsed < 5_000, "elapsed = {elapsed}");
}

#[tokio::test]
async fn test_operator_failure_marks_task_failed() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "failing",
            vec![PlanNodeSpecBuilder::new("root", FAILING)
                .param("message", json!("数据源不可用"))
                .build()],
        ))
        .await
        .unwrap();

    let driver = TaskDriver::new(test_config(), store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;

    assert_eq!(finished.status, TaskStatus::Failed);
    let message = finished.status_message.unwrap();
    assert!(message.contains("root"), "{message}");
    assert!(message.contains("数据源不可用"), "{message}");
}

#[tokio::test]
async fn test_loop_survives_unknown_type_and_missing_runner() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::with_tasks(vec![
        TaskBuilder::new().with_id(1).with_task_type("RCA").build(),
        TaskBuilder::new()
            .with_id(2)
            .with_task_type("NOTIFICATION")
            .with_task_info(json!({ "subscriptionGroupId": 9 }))
            .build(),
    ]));
    let healthy = store
        .create(detection(
            "healthy",
            vec![PlanNodeSpecBuilder::new("root", CONSTANT)
                .param("value", json!(1))
                .build()],
        ))
        .await
        .unwrap();

    let config = WorkerConfig {
        max_parallel_tasks: 1,
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    let unknown = wait_for_terminal(store.as_ref(), 1).await;
    let unregistered = wait_for_terminal(store.as_ref(), 2).await;
    let healthy = wait_for_terminal(store.as_ref(), healthy.id).await;
    driver.shutdown().await;

    assert_eq!(unknown.status, TaskStatus::Failed);
    assert!(unknown.status_message.unwrap().contains("RCA"));
    assert_eq!(unregistered.status, TaskStatus::Failed);
    assert!(unregistered.status_message.unwrap().contains("NOTIFICATION"));
    assert_eq!(healthy.status, TaskStatus::Completed);
}

struct PanickingRunner;

#[async_trait]
impl TaskRunner for PanickingRunner {
    async fn execute(
        &self,
        _task_info: TaskInfo,
        _context: &TaskContext,
    ) -> SchedulerResult<Vec<TaskResult>> {
        panic!("runner exploded")
    }
}

#[tokio::test]
async fn test_panicking_runner_marks_task_failed() {
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(NewTask::new(TaskType::Monitor, "monitor", json!({})))
        .await
        .unwrap();

    let runners = Arc::new(
        TaskRunnerRegistry::new().with_runner(TaskType::Monitor, Arc::new(PanickingRunner)),
    );
    let driver = TaskDriver::new(test_config(), store.clone(), runners).unwrap();
    driver.start().await.unwrap();
    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert!(finished.status_message.unwrap().contains("runner exploded"));
}

#[tokio::test]
async fn test_each_task_runs_exactly_once_across_workers() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let mut ids = Vec::new();
    for i in 0..20 {
        let task = store
            .create(detection(
                &format!("job-{i}"),
                vec![PlanNodeSpecBuilder::new("root", RECORDING).build()],
            ))
            .await
            .unwrap();
        ids.push(task.id);
    }

    let mut drivers = Vec::new();
    for worker_id in 1..=3 {
        let config = WorkerConfig {
            id: Some(worker_id),
            max_parallel_tasks: 3,
            ..test_config()
        };
        let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
        driver.start().await.unwrap();
        drivers.push(driver);
    }

    for id in &ids {
        let finished = wait_for_terminal(store.as_ref(), *id).await;
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.version, 1, "任务 {id} 被获取了不止一次");
    }
    for driver in &drivers {
        driver.shutdown().await;
    }

    assert_eq!(log.count("root"), ids.len());
}

#[tokio::test]
async fn test_startup_fails_leftover_tasks_of_same_worker() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::with_tasks(vec![
        TaskBuilder::new().with_id(1).running_on(1).build(),
        TaskBuilder::new().with_id(2).running_on(2).build(),
    ]));

    let config = WorkerConfig {
        id: Some(1),
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    driver.shutdown().await;

    let leftover = store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(leftover.status, TaskStatus::Failed);
    assert!(leftover.status_message.unwrap().contains("Worker 1"));
    let other = store.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(other.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_ephemeral_startup_reclaims_stale_leases() {
    let log = InvocationLog::new();
    let stale_since = chrono::Utc::now() - chrono::Duration::hours(1);
    let store = Arc::new(InMemoryTaskStore::with_tasks(vec![
        TaskBuilder::new()
            .with_id(1)
            .running_on(77)
            .started_at(stale_since)
            .with_last_active_time(stale_since)
            .build(),
        TaskBuilder::new()
            .with_id(2)
            .running_on(78)
            .with_last_active_time(chrono::Utc::now())
            .build(),
    ]));

    let driver = TaskDriver::with_identity(
        WorkerIdentity::Ephemeral(12345),
        test_config(),
        store.clone(),
        runners(&log),
    );
    driver.start().await.unwrap();
    driver.shutdown().await;

    let stale = store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(stale.status, TaskStatus::Failed);
    assert!(stale.status_message.unwrap().contains("租约过期"));
    let alive = store.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(alive.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_ephemeral_worker_sends_heartbeats() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "heartbeat",
            vec![PlanNodeSpecBuilder::new("root", SLEEP)
                .param("sleepMs", json!(400))
                .build()],
        ))
        .await
        .unwrap();

    let driver = TaskDriver::with_identity(
        WorkerIdentity::Ephemeral(4242),
        test_config(),
        store.clone(),
        runners(&log),
    );
    driver.start().await.unwrap();
    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.worker_id, Some(4242));
    let last_active = finished.last_active_time.unwrap();
    let started = finished.start_time.unwrap();
    assert!(last_active > started, "心跳未更新最后存活时间");
}

#[tokio::test]
async fn test_fixed_worker_long_task_survives_stale_reclaim() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "long-running",
            vec![PlanNodeSpecBuilder::new("root", SLEEP)
                .param("sleepMs", json!(1_500))
                .build()],
        ))
        .await
        .unwrap();

    let driver = TaskDriver::new(test_config(), store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let running = store.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.worker_id, Some(1));

    // 阈值远小于任务已运行的时间，但心跳一直在刷新
    let reclaimed = LeaseRecovery::new(store.clone())
        .reclaim_stale_leases(Duration::from_millis(200), None)
        .await
        .unwrap();
    assert_eq!(reclaimed, 0);

    let finished = wait_for_terminal(store.as_ref(), task.id).await;
    driver.shutdown().await;
    assert_eq!(finished.status, TaskStatus::Completed, "{:?}", finished.status_message);
}

#[tokio::test]
async fn test_shutdown_interrupts_idle_sleep() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let config = WorkerConfig {
        no_task_delay_ms: 60_000,
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    assert!(driver.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    driver.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!driver.is_running());
}

#[tokio::test]
async fn test_shutdown_timeout_leaves_task_running() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "stuck",
            vec![PlanNodeSpecBuilder::new("root", SLEEP)
                .param("sleepMs", json!(10_000))
                .build()],
        ))
        .await
        .unwrap();

    let config = WorkerConfig {
        max_task_run_time_ms: 60_000,
        shutdown_timeout_ms: 100,
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !store.get_by_id(task.id).await.unwrap().unwrap().is_running() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    driver.shutdown().await;

    let stuck = store.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, TaskStatus::Running);
    assert_eq!(stuck.worker_id, Some(1));
}

#[tokio::test]
async fn test_disabled_worker_does_not_start() {
    let log = InvocationLog::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let task = store
        .create(detection(
            "ignored",
            vec![PlanNodeSpecBuilder::new("root", CONSTANT).build()],
        ))
        .await
        .unwrap();

    let config = WorkerConfig {
        enabled: false,
        ..test_config()
    };
    let driver = TaskDriver::new(config, store.clone(), runners(&log)).unwrap();
    driver.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    driver.shutdown().await;

    let task = store.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Waiting);
}
