use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 任务记录
///
/// 表示共享存储中的一个可调度工作单元。任务由外部调度器以 `WAITING`
/// 状态创建，之后只能由持有租约的 Worker 通过带条件的 CAS 操作修改。
///
/// # 字段说明
///
/// - `task_type`: 任务类型原始字符串，执行前才会解析为 [`TaskType`]，
///   未知类型只会让这一次任务尝试失败，不会影响拉取批次
/// - `task_info`: 按类型标记的负载（JSON），见 [`crate::models::TaskInfo`]
/// - `worker_id` / `version`: 租约，`RUNNING` 期间记录持有者和乐观锁版本
/// - `last_active_time`: 心跳写入的存活时间戳
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub task_type: String,
    pub task_info: serde_json::Value,
    pub status: TaskStatus,
    pub worker_id: Option<i64>,
    pub version: i32,
    pub job_name: String,
    pub status_message: Option<String>,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_active_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// 解析任务类型，未知类型返回 [`SchedulerError::UnknownTaskType`]
    pub fn kind(&self) -> SchedulerResult<TaskType> {
        self.task_type.parse()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 最近一次存活时间：优先心跳时间，其次开始时间
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_active_time.or(self.start_time)
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(ended)) = (self.start_time, self.end_time) {
            Some((ended - started).num_milliseconds())
        } else {
            None
        }
    }
}

/// 新建任务请求，由外部调度器写入存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub task_info: serde_json::Value,
    pub job_name: String,
}

impl NewTask {
    pub fn new(task_type: TaskType, job_name: impl Into<String>, task_info: serde_json::Value) -> Self {
        Self {
            task_type: task_type.to_string(),
            task_info,
            job_name: job_name.into(),
        }
    }
}

/// 任务状态
///
/// `WAITING → RUNNING → {COMPLETED, FAILED, TIMEOUT}`，另外启动恢复会把
/// 遗留的 `RUNNING` 直接改为 `FAILED`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl TaskStatus {
    /// 可以被获取租约的前置状态
    pub const ACQUIRABLE: [TaskStatus; 2] = [TaskStatus::Waiting, TaskStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(TaskStatus::Waiting),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "TIMEOUT" => Ok(TaskStatus::Timeout),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid task status: {s}"
            ))),
        }
    }
}

/// 任务类型，决定由哪个 TaskRunner 解释负载
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "DETECTION")]
    Detection,
    #[serde(rename = "NOTIFICATION")]
    Notification,
    #[serde(rename = "ONBOARDING")]
    Onboarding,
    #[serde(rename = "MONITOR")]
    Monitor,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Detection => "DETECTION",
            TaskType::Notification => "NOTIFICATION",
            TaskType::Onboarding => "ONBOARDING",
            TaskType::Monitor => "MONITOR",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DETECTION" => Ok(TaskType::Detection),
            "NOTIFICATION" => Ok(TaskType::Notification),
            "ONBOARDING" => Ok(TaskType::Onboarding),
            "MONITOR" => Ok(TaskType::Monitor),
            other => Err(SchedulerError::UnknownTaskType(other.to_string())),
        }
    }
}

/// TaskRunner 的单条执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub name: String,
    pub value: serde_json::Value,
}

impl TaskResult {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
