//! 任务获取与执行循环
//!
//! 每个循环在任一时刻最多持有一个任务：拉取一批 WAITING 任务，打乱后逐个尝试
//! 乐观锁获取，获取成功后在执行池中运行并写回终态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use anomaly_core::{
    SchedulerError, Task, TaskResult, TaskStatus, TaskStore, WorkerConfig, WorkerIdentity,
};
use chrono::Utc;
use metrics::{counter, histogram};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::components::{ExecutionPool, HeartbeatManager};
use crate::runners::{TaskContext, TaskRunnerRegistry};

/// 所有工作循环共享的依赖
pub struct WorkerShared {
    pub identity: WorkerIdentity,
    pub config: WorkerConfig,
    pub store: Arc<dyn TaskStore>,
    pub runners: Arc<TaskRunnerRegistry>,
    pub execution_pool: ExecutionPool,
    pub heartbeats: HeartbeatManager,
}

impl WorkerShared {
    pub fn new(
        identity: WorkerIdentity,
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        runners: Arc<TaskRunnerRegistry>,
    ) -> Self {
        let execution_pool = ExecutionPool::new(config.max_parallel_tasks);
        let heartbeats = HeartbeatManager::new(
            Arc::clone(&store),
            config.heartbeat_interval(),
            config.max_parallel_tasks,
        );
        Self {
            identity,
            config,
            store,
            runners,
            execution_pool,
            heartbeats,
        }
    }

    pub fn worker_id(&self) -> i64 {
        self.identity.id()
    }
}

/// 无任务时的等待时间：基础延迟加上 `[0, cap)` 的均匀随机抖动
pub fn no_task_delay(config: &WorkerConfig) -> Duration {
    let jitter = if config.random_delay_cap_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..config.random_delay_cap_ms)
    };
    config.no_task_delay() + Duration::from_millis(jitter)
}

/// 一次任务执行的终态
#[derive(Debug)]
enum ExecutionOutcome {
    Completed(Vec<TaskResult>),
    Failed(String),
    TimedOut(String),
}

impl ExecutionOutcome {
    fn status(&self) -> TaskStatus {
        match self {
            ExecutionOutcome::Completed(_) => TaskStatus::Completed,
            ExecutionOutcome::Failed(_) => TaskStatus::Failed,
            ExecutionOutcome::TimedOut(_) => TaskStatus::Timeout,
        }
    }

    fn into_message(self) -> Option<String> {
        match self {
            ExecutionOutcome::Completed(_) => None,
            ExecutionOutcome::Failed(message) | ExecutionOutcome::TimedOut(message) => {
                Some(message)
            }
        }
    }
}

fn failure_message(error: &SchedulerError) -> String {
    format!("{error}\n\n详细信息: {error:?}")
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知 panic".to_string());
    format!("任务执行过程中发生 panic: {detail}")
}

pub struct TaskAcquisitionLoop {
    shared: Arc<WorkerShared>,
    slot: usize,
    shutdown: watch::Receiver<bool>,
    ascending: bool,
}

impl TaskAcquisitionLoop {
    pub fn new(shared: Arc<WorkerShared>, slot: usize, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shared,
            slot,
            shutdown,
            // 相邻循环从不同方向开始
            ascending: slot % 2 == 0,
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 循环直到收到关闭信号
    pub async fn run(mut self) {
        info!("工作循环 {} 已启动, worker {}", self.slot, self.shared.worker_id());
        while let Some(task) = self.wait_for_task().await {
            self.run_acquired_task(task).await;
            if self.is_shutting_down() {
                break;
            }
        }
        info!("工作循环 {} 已停止", self.slot);
    }

    /// 等待并获取一个任务，只在关闭时返回 `None`
    pub async fn wait_for_task(&mut self) -> Option<Task> {
        loop {
            if self.is_shutting_down() {
                return None;
            }

            let delay = match self.try_acquire_batch().await {
                Ok(Some(task)) => return Some(task),
                Ok(None) => no_task_delay(&self.shared.config),
                Err(e) => {
                    counter!("worker_task_fetch_failures_total").increment(1);
                    warn!("工作循环 {} 获取任务失败: {}", self.slot, e);
                    self.shared.config.task_failure_delay()
                }
            };

            debug!("工作循环 {} 等待 {}ms", self.slot, delay.as_millis());
            if !self.sleep_unless_shutdown(delay).await {
                return None;
            }
        }
    }

    async fn try_acquire_batch(&mut self) -> Result<Option<Task>, SchedulerError> {
        let ascending = self.ascending;
        self.ascending = !ascending;

        let mut candidates = self
            .shared
            .store
            .find_waiting_ordered_by_create_time(self.shared.config.task_fetch_size_cap, ascending)
            .await?;
        candidates.shuffle(&mut rand::rng());

        let worker_id = self.shared.worker_id();
        for mut candidate in candidates {
            let acquired = self
                .shared
                .store
                .try_acquire(worker_id, candidate.id, &TaskStatus::ACQUIRABLE, candidate.version)
                .await?;
            if !acquired {
                counter!("worker_task_lease_conflicts_total").increment(1);
                debug!("任务 {} 已被其他 Worker 获取", candidate.id);
                continue;
            }

            counter!("worker_tasks_acquired_total").increment(1);
            let now = Utc::now();
            candidate.status = TaskStatus::Running;
            candidate.worker_id = Some(worker_id);
            candidate.version += 1;
            candidate.start_time = Some(now);
            candidate.last_active_time = Some(now);
            candidate.end_time = None;
            candidate.status_message = None;
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    /// 睡眠指定时间，期间收到关闭信号则提前返回 `false`
    async fn sleep_unless_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.is_shutting_down(),
            changed = self.shutdown.changed() => changed.is_ok() && !self.is_shutting_down(),
        }
    }

    /// 执行已获取的任务并写回终态
    pub async fn run_acquired_task(&self, task: Task) {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "task",
            task_id = task.id,
            task_type = %task.task_type,
            job_name = %task.job_name,
            worker_id = self.shared.worker_id(),
            correlation_id = %correlation_id,
        );
        self.execute_and_complete(task, correlation_id)
            .instrument(span)
            .await
    }

    async fn execute_and_complete(&self, task: Task, correlation_id: String) {
        let started = Instant::now();
        info!("开始执行任务");

        // 过期租约回收只看 last_active_time，固定 ID 的任务同样需要心跳
        let heartbeat = self.shared.heartbeats.start(task.id);

        let outcome = self.execute(&task, correlation_id).await;
        let status = outcome.status();
        match &outcome {
            ExecutionOutcome::Completed(results) => {
                info!("任务执行成功, 结果数 {}", results.len())
            }
            ExecutionOutcome::Failed(message) => warn!("任务执行失败: {}", message),
            ExecutionOutcome::TimedOut(message) => warn!("{}", message),
        }

        match self
            .shared
            .store
            .complete_with_status(
                task.id,
                TaskStatus::Running,
                status,
                Utc::now().timestamp_millis(),
                outcome.into_message(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("任务已不处于运行状态，放弃写入 {}", status),
            Err(e) => error!("写入任务终态 {} 失败: {}", status, e),
        }
        drop(heartbeat);

        let elapsed = started.elapsed();
        histogram!("worker_task_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
        counter!("worker_tasks_finished_total", "status" => status.as_str()).increment(1);
        info!("任务结束: 状态 {}, 耗时 {}ms", status, elapsed.as_millis());
    }

    async fn execute(&self, task: &Task, correlation_id: String) -> ExecutionOutcome {
        let context = TaskContext {
            task_id: task.id,
            task_type: match task.kind() {
                Ok(kind) => kind,
                Err(e) => return ExecutionOutcome::Failed(failure_message(&e)),
            },
            job_name: task.job_name.clone(),
            worker_id: self.shared.worker_id(),
            correlation_id,
        };

        let runners = Arc::clone(&self.shared.runners);
        let owned = task.clone();
        let execution = async move { runners.run(&owned, &context).await }.in_current_span();

        let mut handle = match self.shared.execution_pool.submit(execution).await {
            Ok(handle) => handle,
            Err(e) => return ExecutionOutcome::Failed(failure_message(&e)),
        };

        let max_run_time = self.shared.config.max_task_run_time();
        match tokio::time::timeout(max_run_time, &mut handle).await {
            Ok(Ok(Ok(results))) => ExecutionOutcome::Completed(results),
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(failure_message(&e)),
            Ok(Err(join_error)) if join_error.is_panic() => {
                ExecutionOutcome::Failed(panic_message(join_error.into_panic()))
            }
            Ok(Err(_)) => ExecutionOutcome::Failed("任务执行被取消".to_string()),
            Err(_) => {
                handle.abort();
                ExecutionOutcome::TimedOut(
                    SchedulerError::ExecutionTimeout(format!(
                        "运行超过最长时间 {}ms 被中止",
                        max_run_time.as_millis()
                    ))
                    .to_string(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_task_delay_within_jitter_range() {
        let config = WorkerConfig {
            no_task_delay_ms: 15_000,
            random_delay_cap_ms: 15_000,
            ..WorkerConfig::default()
        };

        for _ in 0..1000 {
            let delay = no_task_delay(&config);
            assert!(delay >= Duration::from_secs(15), "{delay:?}");
            assert!(delay < Duration::from_secs(30), "{delay:?}");
        }
    }

    #[test]
    fn test_no_task_delay_without_jitter() {
        let config = WorkerConfig {
            no_task_delay_ms: 100,
            random_delay_cap_ms: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(no_task_delay(&config), Duration::from_millis(100));
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let message = panic_message(Box::new("boom"));
        assert!(message.contains("boom"));
        let message = panic_message(Box::new(String::from("kaboom")));
        assert!(message.contains("kaboom"));
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(
            ExecutionOutcome::Completed(vec![]).status(),
            TaskStatus::Completed
        );
        let timed_out = ExecutionOutcome::TimedOut("超时".to_string());
        assert_eq!(timed_out.status(), TaskStatus::Timeout);
        assert_eq!(timed_out.into_message().as_deref(), Some("超时"));
    }
}
