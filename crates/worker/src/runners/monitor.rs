use std::sync::Arc;
use std::time::Duration;

use anomaly_core::{SchedulerError, SchedulerResult, TaskInfo, TaskResult, TaskStore, TaskType};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{unexpected_payload, TaskContext, TaskRunner};
use crate::components::LeaseRecovery;

/// 监控任务：回收所有 Worker 遗留的过期租约
pub struct MonitorTaskRunner {
    recovery: LeaseRecovery,
    default_threshold: Duration,
    heartbeat_interval: Duration,
}

impl MonitorTaskRunner {
    pub fn new(store: Arc<dyn TaskStore>, default_threshold: Duration) -> Self {
        Self {
            recovery: LeaseRecovery::new(store),
            default_threshold,
            heartbeat_interval: Duration::ZERO,
        }
    }

    /// 任务里覆盖的阈值必须大于心跳间隔，否则仍在运行的任务也会被回收
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

#[async_trait]
impl TaskRunner for MonitorTaskRunner {
    async fn execute(
        &self,
        task_info: TaskInfo,
        context: &TaskContext,
    ) -> SchedulerResult<Vec<TaskResult>> {
        let TaskInfo::Monitor(info) = task_info else {
            return Err(unexpected_payload(TaskType::Monitor, &task_info));
        };

        let threshold = info
            .stale_lease_threshold_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_threshold);
        if threshold <= self.heartbeat_interval {
            return Err(SchedulerError::invalid_plan(format!(
                "过期租约阈值({}ms)必须大于心跳间隔({}ms)",
                threshold.as_millis(),
                self.heartbeat_interval.as_millis()
            )));
        }
        // 跳过监控任务自身
        let reclaimed = self
            .recovery
            .reclaim_stale_leases(threshold, Some(context.task_id))
            .await?;

        info!(
            "监控任务完成: 回收过期租约 {} 个, 阈值={}ms",
            reclaimed,
            threshold.as_millis()
        );
        Ok(vec![
            TaskResult::new("reclaimed_tasks", json!(reclaimed)),
            TaskResult::new("threshold_ms", json!(threshold.as_millis() as u64)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::{MonitorTaskInfo, TaskStatus};
    use anomaly_infrastructure::InMemoryTaskStore;
    use serde_json::json;

    fn context(task_id: i64) -> TaskContext {
        TaskContext {
            task_id,
            task_type: TaskType::Monitor,
            job_name: "monitor".to_string(),
            worker_id: 1,
            correlation_id: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_threshold_below_heartbeat_is_rejected() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store
            .create(anomaly_core::NewTask::new(TaskType::Detection, "job", json!({})))
            .await
            .unwrap();
        assert!(store
            .try_acquire(2, task.id, &TaskStatus::ACQUIRABLE, task.version)
            .await
            .unwrap());

        let runner = MonitorTaskRunner::new(store.clone(), Duration::from_secs(600))
            .with_heartbeat_interval(Duration::from_secs(30));
        let info = MonitorTaskInfo {
            stale_lease_threshold_ms: Some(1_000),
        };
        let err = runner
            .execute(TaskInfo::Monitor(info), &context(99))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("心跳间隔"), "{err}");

        let untouched = store.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_default_threshold_reports_results() {
        let store = Arc::new(InMemoryTaskStore::new());
        let runner = MonitorTaskRunner::new(store, Duration::from_secs(600))
            .with_heartbeat_interval(Duration::from_secs(30));
        let results = runner
            .execute(TaskInfo::Monitor(MonitorTaskInfo::default()), &context(1))
            .await
            .unwrap();
        assert_eq!(results[0].name, "reclaimed_tasks");
        assert_eq!(results[0].value, json!(0));
        assert_eq!(results[1].value, json!(600_000));
    }
}
