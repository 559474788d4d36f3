use thiserror::Error;

use crate::models::TaskType;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("未知的任务类型: {0}")]
    UnknownTaskType(String),

    #[error("任务类型 {0} 没有注册执行器")]
    RunnerNotRegistered(TaskType),

    #[error("未知的组件类型: {0}")]
    UnknownComponentType(String),

    #[error("无效的执行计划: {0}")]
    InvalidPlan(String),

    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    #[error("执行上下文缺少键: {0}")]
    MissingContextKey(String),

    #[error("任务执行超时: {0}")]
    ExecutionTimeout(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("算子执行错误: 节点 {node} - {message}")]
    OperatorExecution { node: String, message: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_plan<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn operator_error<N: Into<String>, M: Into<String>>(node: N, message: M) -> Self {
        Self::OperatorExecution {
            node: node.into(),
            message: message.into(),
        }
    }

    /// 致命错误只终止当前这一次任务尝试，重试没有意义
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::UnknownTaskType(_)
                | SchedulerError::RunnerNotRegistered(_)
                | SchedulerError::UnknownComponentType(_)
                | SchedulerError::InvalidPlan(_)
                | SchedulerError::CircularDependency(_)
                | SchedulerError::MissingContextKey(_)
                | SchedulerError::Configuration(_)
        )
    }

    /// 存储层的瞬时错误，工作循环会在失败延迟后继续
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_) | SchedulerError::DatabaseOperation(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::MissingContextKey("detector#x".to_string());
        assert_eq!(err.to_string(), "执行上下文缺少键: detector#x");

        let err = SchedulerError::operator_error("fetcher", "boom");
        assert_eq!(err.to_string(), "算子执行错误: 节点 fetcher - boom");

        let err = SchedulerError::RunnerNotRegistered(TaskType::Notification);
        assert_eq!(err.to_string(), "任务类型 NOTIFICATION 没有注册执行器");
    }

    #[test]
    fn test_error_classification() {
        assert!(SchedulerError::MissingContextKey("a#b".into()).is_fatal());
        assert!(SchedulerError::UnknownTaskType("FOO".into()).is_fatal());
        assert!(!SchedulerError::TaskExecution("x".into()).is_fatal());
        assert!(SchedulerError::database_error("locked").is_transient());
        assert!(!SchedulerError::ExecutionTimeout("1s".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json() {
        let err: SchedulerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
