use serde::{Deserialize, Serialize};

use super::{PlanNodeSpec, TaskType};
use crate::{SchedulerError, SchedulerResult};

fn default_root() -> String {
    "root".to_string()
}

fn default_chunk_millis() -> i64 {
    30 * 24 * 60 * 60 * 1000
}

/// 检测任务负载：对 `[start, end)` 执行一次检测计划
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionTaskInfo {
    pub alert_id: i64,
    pub start: i64,
    pub end: i64,
    pub nodes: Vec<PlanNodeSpec>,
    #[serde(default = "default_root")]
    pub root: String,
}

/// 通知任务负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTaskInfo {
    pub subscription_group_id: i64,
}

/// 上线回放任务负载：按 `chunk_millis` 切分历史区间逐段检测
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingTaskInfo {
    pub alert_id: i64,
    pub start: i64,
    pub end: i64,
    pub nodes: Vec<PlanNodeSpec>,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_chunk_millis")]
    pub chunk_millis: i64,
}

/// 监控（内务）任务负载
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTaskInfo {
    /// 覆盖配置中的过期租约阈值
    #[serde(default)]
    pub stale_lease_threshold_ms: Option<u64>,
}

/// 按任务类型区分的负载
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInfo {
    Detection(DetectionTaskInfo),
    Notification(NotificationTaskInfo),
    Onboarding(OnboardingTaskInfo),
    Monitor(MonitorTaskInfo),
}

impl TaskInfo {
    /// 根据任务类型字符串解码负载
    ///
    /// 未知类型返回 [`SchedulerError::UnknownTaskType`]，负载结构不匹配返回序列化错误，
    /// 两者都在执行前拒绝任务。
    pub fn decode(task_type: &str, payload: &serde_json::Value) -> SchedulerResult<Self> {
        let kind: TaskType = task_type.parse()?;
        let info = match kind {
            TaskType::Detection => TaskInfo::Detection(decode_payload(kind, payload)?),
            TaskType::Notification => TaskInfo::Notification(decode_payload(kind, payload)?),
            TaskType::Onboarding => TaskInfo::Onboarding(decode_payload(kind, payload)?),
            TaskType::Monitor => TaskInfo::Monitor(decode_payload(kind, payload)?),
        };
        Ok(info)
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskInfo::Detection(_) => TaskType::Detection,
            TaskInfo::Notification(_) => TaskType::Notification,
            TaskInfo::Onboarding(_) => TaskType::Onboarding,
            TaskInfo::Monitor(_) => TaskType::Monitor,
        }
    }

    pub fn to_value(&self) -> SchedulerResult<serde_json::Value> {
        let value = match self {
            TaskInfo::Detection(info) => serde_json::to_value(info)?,
            TaskInfo::Notification(info) => serde_json::to_value(info)?,
            TaskInfo::Onboarding(info) => serde_json::to_value(info)?,
            TaskInfo::Monitor(info) => serde_json::to_value(info)?,
        };
        Ok(value)
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: TaskType,
    payload: &serde_json::Value,
) -> SchedulerResult<T> {
    T::deserialize(payload).map_err(|e| {
        SchedulerError::Serialization(format!("{kind} 任务负载解析失败: {e}"))
    })
}
