use std::sync::Arc;
use std::time::Duration;

use anomaly_core::TaskStore;
use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::AbortOnDrop;

/// 租约心跳
///
/// 每个运行中的任务一个定时刷新 `last_active_time` 的后台任务，
/// 同时写入的心跳数受执行池容量限制。
#[derive(Clone)]
pub struct HeartbeatManager {
    store: Arc<dyn TaskStore>,
    interval: Duration,
    slots: Arc<Semaphore>,
}

impl HeartbeatManager {
    pub fn new(store: Arc<dyn TaskStore>, interval: Duration, max_parallel: usize) -> Self {
        Self {
            store,
            interval,
            slots: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 开始为任务发送心跳，返回的句柄被丢弃时停止
    pub fn start(&self, task_id: i64) -> AbortOnDrop<()> {
        let store = Arc::clone(&self.store);
        let slots = Arc::clone(&self.slots);
        let period = self.interval;

        AbortOnDrop::new(tokio::spawn(async move {
            // 获取任务时已写入 last_active_time，第一次心跳在一个周期之后
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Ok(_slot) = slots.acquire().await else {
                    break;
                };
                match store.touch_heartbeat(task_id).await {
                    Ok(()) => debug!("任务 {} 心跳已更新", task_id),
                    Err(e) => warn!("任务 {} 心跳更新失败: {}", task_id, e),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_core::{NewTask, TaskStatus, TaskType};
    use anomaly_infrastructure::InMemoryTaskStore;
    use serde_json::json;

    async fn last_active(store: &InMemoryTaskStore, id: i64) -> Option<chrono::DateTime<chrono::Utc>> {
        store.get_by_id(id).await.unwrap().unwrap().last_active_time
    }

    #[tokio::test]
    async fn test_heartbeat_ticks_until_dropped() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store
            .create(NewTask::new(TaskType::Detection, "job", json!({})))
            .await
            .unwrap();
        assert!(store
            .try_acquire(1, task.id, &TaskStatus::ACQUIRABLE, task.version)
            .await
            .unwrap());
        let acquired_at = last_active(&store, task.id).await;

        let manager = HeartbeatManager::new(store.clone(), Duration::from_millis(50), 1);
        let handle = manager.start(task.id);
        tokio::time::sleep(Duration::from_millis(180)).await;
        drop(handle);

        let beaten = last_active(&store, task.id).await;
        assert!(beaten > acquired_at);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(last_active(&store, task.id).await, beaten);
    }
}
