use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use anomaly_core::{NewTask, SchedulerError, SchedulerResult, Task, TaskStatus, TaskStore};

const TASK_COLUMNS: &str = "id, task_type, task_info, status, worker_id, version, job_name, \
     status_message, create_time, start_time, last_active_time, end_time";

/// SQLite 任务存储，时间列存 epoch 毫秒
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Task> {
        let status: String = row.try_get("status")?;
        let task_info: String = row.try_get("task_info")?;
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            task_info: serde_json::from_str(&task_info)?,
            status: status.parse()?,
            worker_id: row.try_get("worker_id")?,
            version: row.try_get("version")?,
            job_name: row.try_get("job_name")?,
            status_message: row.try_get("status_message")?,
            create_time: millis_to_datetime(row.try_get("create_time")?)?,
            start_time: optional_millis(row.try_get("start_time")?)?,
            last_active_time: optional_millis(row.try_get("last_active_time")?)?,
            end_time: optional_millis(row.try_get("end_time")?)?,
        })
    }

    fn rows_to_tasks(rows: &[sqlx::sqlite::SqliteRow]) -> SchedulerResult<Vec<Task>> {
        rows.iter().map(Self::row_to_task).collect()
    }
}

fn millis_to_datetime(millis: i64) -> SchedulerResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SchedulerError::Serialization(format!("无效的时间戳: {millis}")))
}

fn optional_millis(millis: Option<i64>) -> SchedulerResult<Option<DateTime<Utc>>> {
    millis.map(millis_to_datetime).transpose()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task_type = %task.task_type, job_name = %task.job_name))]
    async fn create(&self, task: NewTask) -> SchedulerResult<Task> {
        let now = Utc::now();
        let create_time = millis_to_datetime(now.timestamp_millis())?;
        let task_info = serde_json::to_string(&task.task_info)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (task_type, task_info, status, version, job_name, create_time)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&task.task_type)
        .bind(&task_info)
        .bind(TaskStatus::Waiting.as_str())
        .bind(&task.job_name)
        .bind(create_time.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let id = result.last_insert_rowid();
        debug!("创建任务成功: ID {}", id);
        Ok(Task {
            id,
            task_type: task.task_type,
            task_info: task.task_info,
            status: TaskStatus::Waiting,
            worker_id: None,
            version: 0,
            job_name: task.job_name,
            status_message: None,
            create_time,
            start_time: None,
            last_active_time: None,
            end_time: None,
        })
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_waiting_ordered_by_create_time(
        &self,
        limit: usize,
        ascending: bool,
    ) -> SchedulerResult<Vec<Task>> {
        let order = if ascending { "ASC" } else { "DESC" };
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? \
             ORDER BY create_time {order}, id {order} LIMIT ?"
        ))
        .bind(TaskStatus::Waiting.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::rows_to_tasks(&rows)
    }

    #[instrument(skip(self, allowed_prior))]
    async fn try_acquire(
        &self,
        worker_id: i64,
        task_id: i64,
        allowed_prior: &[TaskStatus],
        expected_version: i32,
    ) -> SchedulerResult<bool> {
        if allowed_prior.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; allowed_prior.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = ?, worker_id = ?, version = version + 1,
                start_time = ?, last_active_time = ?, end_time = NULL, status_message = NULL
            WHERE id = ? AND version = ? AND status IN ({placeholders})
            "#
        );

        let now = Utc::now().timestamp_millis();
        let mut query = sqlx::query(&sql)
            .bind(TaskStatus::Running.as_str())
            .bind(worker_id)
            .bind(now)
            .bind(now)
            .bind(task_id)
            .bind(expected_version);
        for status in allowed_prior {
            query = query.bind(status.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, message))]
    async fn complete_with_status(
        &self,
        task_id: i64,
        expected_prior: TaskStatus,
        new_status: TaskStatus,
        end_time_millis: i64,
        message: Option<String>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, end_time = ?, status_message = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(new_status.as_str())
        .bind(end_time_millis)
        .bind(message)
        .bind(task_id)
        .bind(expected_prior.as_str())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn touch_heartbeat(&self, task_id: i64) -> SchedulerResult<()> {
        sqlx::query("UPDATE tasks SET last_active_time = ? WHERE id = ? AND status = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(task_id)
            .bind(TaskStatus::Running.as_str())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn find_running_owned_by(&self, worker_id: i64) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? AND worker_id = ? ORDER BY id"
        ))
        .bind(TaskStatus::Running.as_str())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::rows_to_tasks(&rows)
    }

    async fn find_running_inactive_since(
        &self,
        threshold: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? \
             AND COALESCE(last_active_time, start_time, create_time) < ? ORDER BY id"
        ))
        .bind(TaskStatus::Running.as_str())
        .bind(threshold.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::rows_to_tasks(&rows)
    }
}
