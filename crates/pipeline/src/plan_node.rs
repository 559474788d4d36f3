use std::collections::HashMap;
use std::sync::Arc;

use anomaly_core::{PlanNodeSpec, SchedulerError, SchedulerResult};

use crate::executor::PlanExecutor;
use crate::operator::{Operator, OperatorContext, OperatorResult, TimeWindow};
use crate::registry::OperatorRegistry;

/// 计划节点的运行时形态：节点定义 + 时间窗口 + 已绑定的输入
#[derive(Debug)]
pub struct PlanNode {
    spec: PlanNodeSpec,
    window: TimeWindow,
    inputs: HashMap<String, OperatorResult>,
}

impl PlanNode {
    pub fn new(spec: PlanNodeSpec, window: TimeWindow) -> Self {
        Self {
            spec,
            window,
            inputs: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn component_type(&self) -> &str {
        &self.spec.component_type
    }

    pub fn set_input(&mut self, key: impl Into<String>, value: OperatorResult) {
        self.inputs.insert(key.into(), value);
    }

    /// 创建并初始化算子，返回的算子尚未执行
    pub fn run(
        self,
        registry: &OperatorRegistry,
        plan: Arc<HashMap<String, PlanNodeSpec>>,
        executor: PlanExecutor,
    ) -> SchedulerResult<Box<dyn Operator>> {
        let mut operator = registry.create(&self.spec.component_type)?;
        let node_name = self.spec.name.clone();
        operator
            .init(OperatorContext {
                plan_node: self.spec,
                window: self.window,
                inputs: self.inputs,
                plan,
                executor,
            })
            .map_err(|e| wrap_operator_error(&node_name, e))?;
        Ok(operator)
    }
}

/// 给算子错误补上节点名，计划和契约类错误保持原样
pub(crate) fn wrap_operator_error(node: &str, err: SchedulerError) -> SchedulerError {
    if err.is_fatal() || matches!(err, SchedulerError::OperatorExecution { .. }) {
        err
    } else {
        SchedulerError::operator_error(node, err.to_string())
    }
}
