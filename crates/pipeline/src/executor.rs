use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anomaly_core::{PlanNodeSpec, SchedulerError, SchedulerResult};
use futures::future::BoxFuture;
use metrics::histogram;
use tracing::debug;

use crate::context::{ContextKey, ExecutionContext};
use crate::operator::{OperatorResult, TimeWindow};
use crate::plan_node::{wrap_operator_error, PlanNode};
use crate::registry::OperatorRegistry;
use crate::validation::PlanValidator;

/// 执行计划的索引形式：节点名 → 节点定义
pub type Plan = Arc<HashMap<String, PlanNodeSpec>>;

/// DAG 计划执行器
///
/// 从指定节点出发深度优先解析输入，每个节点在一次执行中最多运行一次，
/// 结果按 `(节点名, 输出键)` 记入 [`ExecutionContext`]。执行器内部没有超时，
/// 取消只发生在整个任务的粒度上。
#[derive(Clone)]
pub struct PlanExecutor {
    registry: Arc<OperatorRegistry>,
    parallelism: usize,
}

impl PlanExecutor {
    /// `parallelism` 是 fork-join 分支的默认并发上限
    pub fn new(registry: Arc<OperatorRegistry>, parallelism: usize) -> Self {
        Self {
            registry,
            parallelism: parallelism.max(1),
        }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// 校验并执行计划，返回根节点的全部输出
    pub async fn execute_plan(
        &self,
        nodes: &[PlanNodeSpec],
        root: &str,
        window: TimeWindow,
    ) -> SchedulerResult<HashMap<String, OperatorResult>> {
        let plan = PlanValidator::validate(nodes, root)?;
        for node in plan.values() {
            if !self.registry.contains(&node.component_type) {
                return Err(SchedulerError::UnknownComponentType(
                    node.component_type.clone(),
                ));
            }
        }

        self.execute_in_plan(Arc::new(plan), root, window).await
    }

    /// 在已校验的计划中用新的上下文执行某个节点，返回该节点的输出
    pub async fn execute_in_plan(
        &self,
        plan: Plan,
        node_name: &str,
        window: TimeWindow,
    ) -> SchedulerResult<HashMap<String, OperatorResult>> {
        let mut context = ExecutionContext::new();
        self.execute_plan_node(&plan, &mut context, node_name, window)
            .await?;
        Ok(context.outputs_of(node_name))
    }

    /// 执行单个节点，缺失的输入先递归执行其来源节点
    pub fn execute_plan_node<'a>(
        &'a self,
        plan: &'a Plan,
        context: &'a mut ExecutionContext,
        node_name: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, SchedulerResult<()>> {
        Box::pin(async move {
            let spec = plan.get(node_name).ok_or_else(|| {
                SchedulerError::invalid_plan(format!("计划中不存在节点: {node_name}"))
            })?;

            let mut node = PlanNode::new(spec.clone(), window);
            for input in &spec.inputs {
                let key = ContextKey::new(&input.source_plan_node, &input.source_property);
                if !context.contains(&key) && !context.is_executed(&input.source_plan_node) {
                    self.execute_plan_node(plan, context, &input.source_plan_node, window)
                        .await?;
                }

                let value = context
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| SchedulerError::MissingContextKey(key.encode()))?;
                node.set_input(input.target_property.clone(), value);
            }

            let outputs = self.run_node(plan, node).await?;
            for (output_key, value) in outputs {
                context.insert(ContextKey::new(node_name, output_key), value);
            }
            context.mark_executed(node_name);

            Ok(())
        })
    }

    /// 创建、初始化并执行一个已绑定输入的节点
    pub(crate) async fn run_node(
        &self,
        plan: &Plan,
        node: PlanNode,
    ) -> SchedulerResult<HashMap<String, OperatorResult>> {
        let node_name = node.name().to_string();
        let component_type = node.component_type().to_string();
        debug!("执行计划节点: {} ({})", node_name, component_type);

        let start = Instant::now();
        let mut operator = node.run(&self.registry, Arc::clone(plan), self.clone())?;
        operator
            .execute()
            .await
            .map_err(|e| wrap_operator_error(&node_name, e))?;
        let outputs = operator.outputs();

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        histogram!("pipeline_operator_duration_ms", "component" => component_type)
            .record(elapsed_ms);
        debug!(
            "计划节点 {} 执行完成，输出 {} 项，耗时 {:.1}ms",
            node_name,
            outputs.len(),
            elapsed_ms
        );

        Ok(outputs)
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("registry", &self.registry)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}
