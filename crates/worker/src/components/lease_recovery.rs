use std::sync::Arc;
use std::time::Duration;

use anomaly_core::{SchedulerError, SchedulerResult, Task, TaskStatus, TaskStore};
use chrono::Utc;
use tracing::{info, warn};

/// 租约恢复
///
/// 把无人负责的 RUNNING 任务标记为 FAILED，使其重新可被获取。
/// 所有写入都以 RUNNING 为前置状态，不会覆盖并发完成的结果。
#[derive(Clone)]
pub struct LeaseRecovery {
    store: Arc<dyn TaskStore>,
}

impl LeaseRecovery {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// 启动时处理本 Worker 上次运行遗留的任务
    pub async fn handle_leftover_tasks(&self, worker_id: i64) -> SchedulerResult<usize> {
        let leftovers = self.store.find_running_owned_by(worker_id).await?;
        if leftovers.is_empty() {
            return Ok(0);
        }

        info!("Worker {} 发现 {} 个遗留任务", worker_id, leftovers.len());
        let message = format!("Worker {worker_id} 重启时任务仍处于运行状态");
        self.fail_all(&leftovers, &message).await
    }

    /// 回收最后存活时间早于 `now - threshold` 的任务
    pub async fn reclaim_stale_leases(
        &self,
        threshold: Duration,
        exclude: Option<i64>,
    ) -> SchedulerResult<usize> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| SchedulerError::config_error(format!("过期租约阈值无效: {e}")))?;
        let cutoff = Utc::now() - threshold;

        let stale: Vec<Task> = self
            .store
            .find_running_inactive_since(cutoff)
            .await?
            .into_iter()
            .filter(|task| Some(task.id) != exclude)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        info!("发现 {} 个过期租约, 截止时间 {}", stale.len(), cutoff);
        let message = format!("租约过期: 最后存活时间早于 {}", cutoff.to_rfc3339());
        self.fail_all(&stale, &message).await
    }

    async fn fail_all(&self, tasks: &[Task], message: &str) -> SchedulerResult<usize> {
        let mut reclaimed = 0;
        for task in tasks {
            let updated = self
                .store
                .complete_with_status(
                    task.id,
                    TaskStatus::Running,
                    TaskStatus::Failed,
                    Utc::now().timestamp_millis(),
                    Some(message.to_string()),
                )
                .await?;
            if updated {
                info!("任务 {} (worker {:?}) 已标记为失败", task.id, task.worker_id);
                reclaimed += 1;
            } else {
                warn!("任务 {} 状态已变化，跳过回收", task.id);
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::{NewTask, TaskType};
    use anomaly_infrastructure::InMemoryTaskStore;
    use serde_json::json;

    async fn running_task(store: &InMemoryTaskStore, worker_id: i64) -> i64 {
        let task = store
            .create(NewTask::new(TaskType::Detection, "job", json!({})))
            .await
            .unwrap();
        assert!(store
            .try_acquire(worker_id, task.id, &TaskStatus::ACQUIRABLE, task.version)
            .await
            .unwrap());
        task.id
    }

    #[tokio::test]
    async fn test_leftover_tasks_are_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mine = running_task(&store, 1).await;
        let theirs = running_task(&store, 2).await;

        let recovery = LeaseRecovery::new(store.clone());
        assert_eq!(recovery.handle_leftover_tasks(1).await.unwrap(), 1);

        let mine = store.get_by_id(mine).await.unwrap().unwrap();
        assert_eq!(mine.status, TaskStatus::Failed);
        assert!(mine.status_message.unwrap().contains("Worker 1"));
        assert!(mine.end_time.is_some());
        let theirs = store.get_by_id(theirs).await.unwrap().unwrap();
        assert_eq!(theirs.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_stale_leases_are_reclaimed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let stale = running_task(&store, 1).await;
        let monitor = running_task(&store, 2).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = running_task(&store, 3).await;

        let recovery = LeaseRecovery::new(store.clone());
        let reclaimed = recovery
            .reclaim_stale_leases(Duration::from_millis(30), Some(monitor))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let status = |id| {
            let store = store.clone();
            async move { store.get_by_id(id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(stale).await, TaskStatus::Failed);
        assert_eq!(status(monitor).await, TaskStatus::Running);
        assert_eq!(status(fresh).await, TaskStatus::Running);
    }
}
