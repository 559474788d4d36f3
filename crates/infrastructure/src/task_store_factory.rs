use std::sync::Arc;

use anomaly_core::{DatabaseConfig, SchedulerError, SchedulerResult, TaskStore};
use tracing::info;

use crate::database::sqlite::{DatabaseManager, SqliteTaskStore};
use crate::in_memory_task_store::InMemoryTaskStore;

/// 任务存储工厂
pub struct TaskStoreFactory;

impl TaskStoreFactory {
    /// 按数据库配置创建任务存储，SQLite 存储会先执行建表
    pub async fn create(config: &DatabaseConfig) -> SchedulerResult<Arc<dyn TaskStore>> {
        if config.is_memory() {
            info!("使用内存任务存储");
            return Ok(Arc::new(InMemoryTaskStore::new()));
        }

        if !config.url.starts_with("sqlite:") {
            return Err(SchedulerError::config_error(format!(
                "不支持的数据库URL: {}",
                config.url
            )));
        }

        let manager = DatabaseManager::new(config)
            .await
            .map_err(|e| SchedulerError::database_error(format!("{e:#}")))?;
        manager
            .migrate()
            .await
            .map_err(|e| SchedulerError::database_error(format!("{e:#}")))?;

        info!("使用SQLite任务存储");
        Ok(Arc::new(SqliteTaskStore::new(manager.pool().clone())))
    }
}

pub async fn create_task_store(config: &DatabaseConfig) -> SchedulerResult<Arc<dyn TaskStore>> {
    TaskStoreFactory::create(config).await
}
