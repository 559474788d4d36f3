use std::collections::HashMap;

use anomaly_core::{
    PlanNodeSpec, SchedulerResult, TaskInfo, TaskResult, TaskType,
};
use anomaly_pipeline::{OperatorResult, PlanExecutor, TimeWindow};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{unexpected_payload, TaskContext, TaskRunner};

/// 检测任务：在 `[start, end)` 上执行一次检测计划
pub struct DetectionTaskRunner {
    executor: PlanExecutor,
}

impl DetectionTaskRunner {
    pub fn new(executor: PlanExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TaskRunner for DetectionTaskRunner {
    async fn execute(
        &self,
        task_info: TaskInfo,
        context: &TaskContext,
    ) -> SchedulerResult<Vec<TaskResult>> {
        let TaskInfo::Detection(info) = task_info else {
            return Err(unexpected_payload(TaskType::Detection, &task_info));
        };

        info!(
            "执行检测任务: alert_id={}, 区间=[{}, {}), 节点数={}, task_id={}",
            info.alert_id,
            info.start,
            info.end,
            info.nodes.len(),
            context.task_id
        );
        run_detection(
            &self.executor,
            &info.nodes,
            &info.root,
            TimeWindow::new(info.start, info.end),
        )
        .await
    }
}

/// 执行计划并把根节点输出转换为任务结果
pub(crate) async fn run_detection(
    executor: &PlanExecutor,
    nodes: &[PlanNodeSpec],
    root: &str,
    window: TimeWindow,
) -> SchedulerResult<Vec<TaskResult>> {
    let outputs = executor.execute_plan(nodes, root, window).await?;
    let output_names: HashMap<&str, &str> = nodes
        .iter()
        .find(|node| node.name == root)
        .map(|node| {
            node.outputs
                .iter()
                .map(|binding| (binding.output_key.as_str(), binding.output_name.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let mut results = outputs
        .into_iter()
        .map(|(key, value)| {
            let name = output_names
                .get(key.as_str())
                .map(|name| name.to_string())
                .unwrap_or(key);
            to_task_result(name, &value)
        })
        .collect::<SchedulerResult<Vec<_>>>()?;
    results.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(results)
}

/// 异常列表附带数量摘要，其余输出原样转为 JSON
fn to_task_result(name: String, value: &OperatorResult) -> SchedulerResult<TaskResult> {
    let value = match value {
        OperatorResult::Anomalies(anomalies) => json!({
            "count": anomalies.len(),
            "anomalies": value.to_json()?,
        }),
        other => other.to_json()?,
    };
    Ok(TaskResult::new(name, value))
}
