pub mod sqlite_task_store;

pub use sqlite_task_store::SqliteTaskStore;

use std::str::FromStr;
use std::time::Duration;

use anomaly_core::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的SQLite连接串: {}", config.url))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if in_memory {
            // 内存库随最后一个连接关闭而消失，只保留一个常驻连接
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接SQLite数据库失败")?;

        info!("SQLite连接池已建立: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建任务表及 `(status, create_time)` 索引
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                task_info TEXT NOT NULL,
                status TEXT NOT NULL,
                worker_id INTEGER,
                version INTEGER NOT NULL DEFAULT 0,
                job_name TEXT NOT NULL,
                status_message TEXT,
                create_time INTEGER NOT NULL,
                start_time INTEGER,
                last_active_time INTEGER,
                end_time INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建tasks表失败")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_create_time ON tasks (status, create_time)",
        )
        .execute(&self.pool)
        .await
        .context("创建tasks索引失败")?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
