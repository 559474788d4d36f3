use serde::{Deserialize, Serialize};

/// 内存存储的URL标记
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory` 使用进程内存储，`sqlite:` 开头使用 SQLite
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:anomaly_scheduler.db?mode=rwc".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }

    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.is_memory() && !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!(
                "数据库URL必须是 {MEMORY_DATABASE_URL} 或 sqlite: 格式: {}",
                self.url
            ));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}
