//! Fan-out / combine
//!
//! `ForkJoin` 节点的参数指定三个计划节点：
//!
//! - `enumerator`: 执行一次，输出 `enumeration`（对象数组，每个元素是一组参数绑定）
//! - `root`: 子计划的根。对每组绑定，把 `root` 及其传递依赖整体克隆，绑定合并进每个
//!   克隆节点的 `params`（同名时绑定优先），用全新的执行上下文执行
//! - `combiner`: 以输入 `branches` 接收按枚举顺序排列的分支结果，它的输出就是
//!   `ForkJoin` 的输出
//!
//! 分支并发数由 `parallelism` 参数限制，默认取执行器的并发度。
//!
//! 分支不单独 spawn，而是作为当前任务内的 future 交替推进（并发而非并行）。
//! 整个任务只占执行池的一个许可；任务超时或被中止时，所有分支随之取消。
//!
//! 失败策略 `failurePolicy`:
//!
//! - `FAIL_FAST`（默认）: 第一个失败的分支让整个节点失败，未完成的分支被丢弃
//! - `COLLECT`: 失败分支记为 `{ "error": …, "binding": … }`，只有全部分支失败时节点才失败

use std::collections::{HashMap, HashSet, VecDeque};

use anomaly_core::{Anomaly, PlanNodeSpec, SchedulerError, SchedulerResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::executor::Plan;
use crate::operator::{BranchOutcome, Operator, OperatorContext, OperatorResult};
use crate::plan_node::PlanNode;

pub const FORK_JOIN: &str = "ForkJoin";
pub const STATIC_ENUMERATOR: &str = "StaticEnumerator";
pub const COLLECT_COMBINER: &str = "CollectCombiner";

/// 枚举器输出键
pub const ENUMERATION_KEY: &str = "enumeration";
/// 合并器输入键
pub const BRANCHES_KEY: &str = "branches";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    Collect,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkJoinParams {
    enumerator: String,
    root: String,
    combiner: String,
    #[serde(default)]
    failure_policy: FailurePolicy,
    #[serde(default)]
    parallelism: Option<usize>,
}

fn not_initialized(component: &str) -> SchedulerError {
    SchedulerError::Internal(format!("{component} 算子未初始化"))
}

#[derive(Default)]
pub struct ForkJoinOperator {
    context: Option<OperatorContext>,
    params: Option<ForkJoinParams>,
    outputs: HashMap<String, OperatorResult>,
}

impl ForkJoinOperator {
    fn bindings(&self, context: &OperatorContext, enumeration: &OperatorResult) -> SchedulerResult<Vec<Map<String, Value>>> {
        let items = enumeration.as_json().and_then(Value::as_array).ok_or_else(|| {
            SchedulerError::operator_error(context.node_name(), "枚举结果必须是数组")
        })?;

        items
            .iter()
            .map(|item| {
                item.as_object().cloned().ok_or_else(|| {
                    SchedulerError::operator_error(
                        context.node_name(),
                        format!("枚举元素必须是对象: {item}"),
                    )
                })
            })
            .collect()
    }

    async fn run_branches(
        &self,
        context: &OperatorContext,
        params: &ForkJoinParams,
        sub_plan: &[PlanNodeSpec],
        bindings: Vec<Map<String, Value>>,
    ) -> SchedulerResult<Vec<BranchOutcome>> {
        let parallelism = params
            .parallelism
            .unwrap_or_else(|| context.executor.parallelism())
            .max(1);

        let branches = bindings.into_iter().map(|binding| {
            let nodes = bind_sub_plan(sub_plan, &binding);
            let executor = context.executor.clone();
            let root = params.root.clone();
            let window = context.window;
            async move {
                let result = executor.execute_plan(&nodes, &root, window).await;
                (Value::Object(binding), result)
            }
        });

        // 分支留在当前 future 里，随任务一起取消
        let results = stream::iter(branches).buffered(parallelism);

        match params.failure_policy {
            FailurePolicy::FailFast => {
                results
                    .map(|(binding, result)| {
                        result.map(|outputs| BranchOutcome::Succeeded { binding, outputs })
                    })
                    .try_collect()
                    .await
            }
            FailurePolicy::Collect => {
                let outcomes: Vec<BranchOutcome> = results
                    .map(|(binding, result)| match result {
                        Ok(outputs) => BranchOutcome::Succeeded { binding, outputs },
                        Err(e) => {
                            warn!("fork-join 分支失败 (binding: {}): {}", binding, e);
                            BranchOutcome::Failed {
                                binding,
                                error: e.to_string(),
                            }
                        }
                    })
                    .collect()
                    .await;

                if !outcomes.is_empty() && outcomes.iter().all(BranchOutcome::is_failed) {
                    return Err(SchedulerError::operator_error(
                        context.node_name(),
                        format!("全部 {} 个分支执行失败", outcomes.len()),
                    ));
                }
                Ok(outcomes)
            }
        }
    }
}

#[async_trait]
impl Operator for ForkJoinOperator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        let params = ForkJoinParams::deserialize(Value::Object(context.plan_node.params.clone()))
            .map_err(|e| {
                SchedulerError::invalid_plan(format!(
                    "ForkJoin 节点 {} 参数无效: {e}",
                    context.node_name()
                ))
            })?;

        for name in [&params.enumerator, &params.root, &params.combiner] {
            if !context.plan.contains_key(name) {
                return Err(SchedulerError::invalid_plan(format!(
                    "ForkJoin 节点 {} 引用了不存在的节点 {name}",
                    context.node_name()
                )));
            }
        }

        self.params = Some(params);
        self.context = Some(context);
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        let context = self.context.as_ref().ok_or_else(|| not_initialized(FORK_JOIN))?;
        let params = self.params.as_ref().ok_or_else(|| not_initialized(FORK_JOIN))?;

        let enumerator_outputs = context
            .executor
            .execute_in_plan(context.plan.clone(), &params.enumerator, context.window)
            .await?;
        let enumeration = enumerator_outputs.get(ENUMERATION_KEY).ok_or_else(|| {
            SchedulerError::MissingContextKey(format!("{}#{ENUMERATION_KEY}", params.enumerator))
        })?;
        let bindings = self.bindings(context, enumeration)?;

        let sub_plan = collect_sub_plan(&context.plan, &params.root);
        info!(
            "fork-join 节点 {} 展开 {} 个分支，子计划 {} 个节点",
            context.node_name(),
            bindings.len(),
            sub_plan.len()
        );

        let outcomes = self
            .run_branches(context, params, &sub_plan, bindings)
            .await?;

        let combiner = context.plan.get(&params.combiner).cloned().ok_or_else(|| {
            SchedulerError::invalid_plan(format!("合并节点不存在: {}", params.combiner))
        })?;
        let mut combiner_node = PlanNode::new(combiner, context.window);
        combiner_node.set_input(BRANCHES_KEY, OperatorResult::Branches(outcomes.into()));

        self.outputs = context
            .executor
            .run_node(&context.plan, combiner_node)
            .await?;
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.outputs.clone()
    }
}

/// `root` 及其传递依赖，按计划中的定义克隆
fn collect_sub_plan(plan: &Plan, root: &str) -> Vec<PlanNodeSpec> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut nodes = Vec::new();

    queue.push_back(root.to_string());
    visited.insert(root.to_string());
    while let Some(name) = queue.pop_front() {
        if let Some(node) = plan.get(&name) {
            for source in node.upstream_nodes() {
                if visited.insert(source.to_string()) {
                    queue.push_back(source.to_string());
                }
            }
            nodes.push(node.clone());
        }
    }
    nodes
}

fn bind_sub_plan(sub_plan: &[PlanNodeSpec], binding: &Map<String, Value>) -> Vec<PlanNodeSpec> {
    sub_plan
        .iter()
        .cloned()
        .map(|mut node| {
            for (key, value) in binding {
                node.params.insert(key.clone(), value.clone());
            }
            node
        })
        .collect()
}

/// 输出 `params.items` 作为枚举结果
#[derive(Default)]
pub struct StaticEnumerator {
    items: Option<Value>,
}

#[async_trait]
impl Operator for StaticEnumerator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        let items = context.param("items").cloned().ok_or_else(|| {
            SchedulerError::invalid_plan(format!(
                "StaticEnumerator 节点 {} 缺少 items 参数",
                context.node_name()
            ))
        })?;
        if !items.is_array() {
            return Err(SchedulerError::invalid_plan(format!(
                "StaticEnumerator 节点 {} 的 items 必须是数组",
                context.node_name()
            )));
        }
        self.items = Some(items);
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.items
            .iter()
            .map(|items| (ENUMERATION_KEY.to_string(), OperatorResult::json(items.clone())))
            .collect()
    }
}

/// 合并全部分支：`combined` 为每个分支的 JSON 形式，`anomalies` 为所有异常的拼接
#[derive(Default)]
pub struct CollectCombiner {
    branches: Option<OperatorResult>,
    outputs: HashMap<String, OperatorResult>,
}

#[async_trait]
impl Operator for CollectCombiner {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        self.branches = Some(context.input(BRANCHES_KEY)?.clone());
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        let branches = self
            .branches
            .as_ref()
            .and_then(OperatorResult::as_branches)
            .ok_or_else(|| not_initialized(COLLECT_COMBINER))?;

        let mut combined = Vec::with_capacity(branches.len());
        let mut anomalies: Vec<Anomaly> = Vec::new();
        for branch in branches {
            combined.push(branch.to_json()?);
            if let BranchOutcome::Succeeded { outputs, .. } = branch {
                let mut keys: Vec<&String> = outputs.keys().collect();
                keys.sort();
                for key in keys {
                    if let Some(found) = outputs[key].as_anomalies() {
                        anomalies.extend_from_slice(found);
                    }
                }
            }
        }

        self.outputs.insert(
            "combined".to_string(),
            OperatorResult::json(Value::Array(combined)),
        );
        self.outputs
            .insert("anomalies".to_string(), OperatorResult::anomalies(anomalies));
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.outputs.clone()
    }
}
