use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use anomaly_core::{NewTask, SchedulerError, SchedulerResult, Task, TaskStatus, TaskStore};

/// 内存任务存储
///
/// 与 SQLite 实现语义一致，每个 CAS 操作在一次写锁内完成。适用于单进程部署和测试。
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<i64, Task>,
    next_id: i64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用现成的任务记录初始化，ID 保持不变
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let next_id = tasks.iter().map(|task| task.id).max().unwrap_or(0);
        let tasks = tasks.into_iter().map(|task| (task.id, task)).collect();
        Self {
            inner: Arc::new(RwLock::new(Inner { tasks, next_id })),
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.read().await.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }
}

fn sort_by_create_time(tasks: &mut [Task], ascending: bool) {
    tasks.sort_by(|a, b| {
        let ordering = a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id));
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: NewTask) -> SchedulerResult<Task> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let created = Task {
            id: inner.next_id,
            task_type: task.task_type,
            task_info: task.task_info,
            status: TaskStatus::Waiting,
            worker_id: None,
            version: 0,
            job_name: task.job_name,
            status_message: None,
            create_time: Utc::now(),
            start_time: None,
            last_active_time: None,
            end_time: None,
        };
        inner.tasks.insert(created.id, created.clone());
        debug!("创建任务成功: ID {}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn find_waiting_ordered_by_create_time(
        &self,
        limit: usize,
        ascending: bool,
    ) -> SchedulerResult<Vec<Task>> {
        let mut waiting: Vec<Task> = self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Waiting)
            .cloned()
            .collect();
        sort_by_create_time(&mut waiting, ascending);
        waiting.truncate(limit);
        Ok(waiting)
    }

    async fn try_acquire(
        &self,
        worker_id: i64,
        task_id: i64,
        allowed_prior: &[TaskStatus],
        expected_version: i32,
    ) -> SchedulerResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return Ok(false);
        };

        if task.version != expected_version || !allowed_prior.contains(&task.status) {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.worker_id = Some(worker_id);
        task.version += 1;
        task.start_time = Some(now);
        task.last_active_time = Some(now);
        task.end_time = None;
        task.status_message = None;
        Ok(true)
    }

    async fn complete_with_status(
        &self,
        task_id: i64,
        expected_prior: TaskStatus,
        new_status: TaskStatus,
        end_time_millis: i64,
        message: Option<String>,
    ) -> SchedulerResult<bool> {
        let end_time = DateTime::from_timestamp_millis(end_time_millis).ok_or_else(|| {
            SchedulerError::Serialization(format!("无效的时间戳: {end_time_millis}"))
        })?;

        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(&task_id) {
            Some(task) if task.status == expected_prior => {
                task.status = new_status;
                task.end_time = Some(end_time);
                task.status_message = message;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_heartbeat(&self, task_id: i64) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            if task.status == TaskStatus::Running {
                task.last_active_time = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn find_running_owned_by(&self, worker_id: i64) -> SchedulerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Running && task.worker_id == Some(worker_id))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn find_running_inactive_since(
        &self,
        threshold: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Running
                    && task.last_seen().unwrap_or(task.create_time) < threshold
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }
}
