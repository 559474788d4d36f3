//! 算子（Operator）契约
//!
//! 每个算子绑定一个计划节点和一个时间窗口，生命周期为：
//! 由注册表创建 → `init` 接收上下文 → `execute` 计算 → `outputs` 交出结果。
//! 算子实例只属于一次执行，不跨任务保留状态。

use std::collections::HashMap;
use std::sync::Arc;

use anomaly_core::{Anomaly, PlanNodeSpec, SchedulerError, SchedulerResult};
use async_trait::async_trait;
use serde_json::Value;

use crate::executor::PlanExecutor;

/// 检测时间窗口 `[start, end)`，epoch 毫秒
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// 算子输出值
///
/// 内部使用 `Arc`，写入执行上下文后被多个下游节点读取时不会复制数据。
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorResult {
    Json(Arc<Value>),
    Anomalies(Arc<Vec<Anomaly>>),
    Branches(Arc<Vec<BranchOutcome>>),
}

impl OperatorResult {
    pub fn json(value: Value) -> Self {
        OperatorResult::Json(Arc::new(value))
    }

    pub fn anomalies(anomalies: Vec<Anomaly>) -> Self {
        OperatorResult::Anomalies(Arc::new(anomalies))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            OperatorResult::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_anomalies(&self) -> Option<&[Anomaly]> {
        match self {
            OperatorResult::Anomalies(anomalies) => Some(anomalies),
            _ => None,
        }
    }

    pub fn as_branches(&self) -> Option<&[BranchOutcome]> {
        match self {
            OperatorResult::Branches(branches) => Some(branches),
            _ => None,
        }
    }

    pub fn to_json(&self) -> SchedulerResult<Value> {
        match self {
            OperatorResult::Json(value) => Ok(value.as_ref().clone()),
            OperatorResult::Anomalies(anomalies) => Ok(serde_json::to_value(anomalies.as_ref())?),
            OperatorResult::Branches(branches) => branches
                .iter()
                .map(BranchOutcome::to_json)
                .collect::<SchedulerResult<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

/// fork-join 单个分支的结果
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
    Succeeded {
        binding: Value,
        outputs: HashMap<String, OperatorResult>,
    },
    Failed {
        binding: Value,
        error: String,
    },
}

impl BranchOutcome {
    pub fn binding(&self) -> &Value {
        match self {
            BranchOutcome::Succeeded { binding, .. } | BranchOutcome::Failed { binding, .. } => {
                binding
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed { .. })
    }

    /// 失败分支序列化为 `{ "error": …, "binding": … }`
    pub fn to_json(&self) -> SchedulerResult<Value> {
        match self {
            BranchOutcome::Succeeded { binding, outputs } => {
                let mut rendered = serde_json::Map::new();
                for (key, value) in outputs {
                    rendered.insert(key.clone(), value.to_json()?);
                }
                Ok(serde_json::json!({ "binding": binding, "outputs": rendered }))
            }
            BranchOutcome::Failed { binding, error } => {
                Ok(serde_json::json!({ "error": error, "binding": binding }))
            }
        }
    }
}

/// 传给 `Operator::init` 的上下文
#[derive(Clone)]
pub struct OperatorContext {
    pub plan_node: PlanNodeSpec,
    pub window: TimeWindow,
    /// 已按 `target_property` 绑定好的输入
    pub inputs: HashMap<String, OperatorResult>,
    /// 当前执行的完整计划，供 fork-join 之类需要再次调度子计划的算子使用
    pub plan: Arc<HashMap<String, PlanNodeSpec>>,
    pub executor: PlanExecutor,
}

impl OperatorContext {
    pub fn node_name(&self) -> &str {
        &self.plan_node.name
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.plan_node.params.get(key)
    }

    pub fn input(&self, key: &str) -> SchedulerResult<&OperatorResult> {
        self.inputs.get(key).ok_or_else(|| {
            SchedulerError::operator_error(&self.plan_node.name, format!("缺少输入: {key}"))
        })
    }
}

/// 算子接口
#[async_trait]
pub trait Operator: Send {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()>;

    async fn execute(&mut self) -> SchedulerResult<()>;

    /// 执行后的命名输出，键为 output key
    fn outputs(&self) -> HashMap<String, OperatorResult>;
}
