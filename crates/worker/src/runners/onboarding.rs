use std::collections::BTreeMap;

use anomaly_core::{OnboardingTaskInfo, SchedulerError, SchedulerResult, TaskInfo, TaskResult, TaskType};
use anomaly_pipeline::{PlanExecutor, TimeWindow};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::detection::run_detection;
use super::{unexpected_payload, TaskContext, TaskRunner};

/// 上线回放任务：把历史区间切分为固定长度的窗口，逐段执行检测计划
pub struct OnboardingTaskRunner {
    executor: PlanExecutor,
}

impl OnboardingTaskRunner {
    pub fn new(executor: PlanExecutor) -> Self {
        Self { executor }
    }
}

/// 单个回放任务允许的最大窗口数
pub const MAX_ONBOARDING_WINDOWS: u64 = 100_000;

/// `[start, end)` 上按固定长度惰性生成的连续窗口
#[derive(Debug, Clone)]
pub struct ChunkWindows {
    cursor: i64,
    end: i64,
    chunk_millis: i64,
    remaining: u64,
}

impl ChunkWindows {
    /// 剩余窗口数
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for ChunkWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return None;
        }
        let chunk_end = self.cursor.saturating_add(self.chunk_millis).min(self.end);
        let window = TimeWindow::new(self.cursor, chunk_end);
        self.cursor = chunk_end;
        self.remaining = self.remaining.saturating_sub(1);
        Some(window)
    }
}

/// 把 `[start, end)` 切成长度不超过 `chunk_millis` 的连续窗口
///
/// 窗口数超过 [`MAX_ONBOARDING_WINDOWS`] 时直接拒绝。
pub fn chunk_windows(start: i64, end: i64, chunk_millis: i64) -> SchedulerResult<ChunkWindows> {
    if chunk_millis <= 0 {
        return Err(SchedulerError::invalid_plan(format!(
            "回放窗口长度必须大于0: {chunk_millis}"
        )));
    }

    let span = (end as i128 - start as i128).max(0);
    let count = (span + chunk_millis as i128 - 1) / chunk_millis as i128;
    if count > MAX_ONBOARDING_WINDOWS as i128 {
        return Err(SchedulerError::invalid_plan(format!(
            "回放窗口数 {count} 超过上限 {MAX_ONBOARDING_WINDOWS}"
        )));
    }

    Ok(ChunkWindows {
        cursor: start,
        end,
        chunk_millis,
        remaining: count as u64,
    })
}

#[async_trait]
impl TaskRunner for OnboardingTaskRunner {
    async fn execute(
        &self,
        task_info: TaskInfo,
        context: &TaskContext,
    ) -> SchedulerResult<Vec<TaskResult>> {
        let TaskInfo::Onboarding(info) = task_info else {
            return Err(unexpected_payload(TaskType::Onboarding, &task_info));
        };
        let OnboardingTaskInfo {
            alert_id,
            start,
            end,
            nodes,
            root,
            chunk_millis,
        } = info;

        let windows = chunk_windows(start, end, chunk_millis)?;
        info!(
            "执行回放任务: alert_id={}, 区间=[{}, {}), 窗口数={}, task_id={}",
            alert_id,
            start,
            end,
            windows.remaining(),
            context.task_id
        );

        // 同名结果按窗口顺序聚合
        let mut aggregated: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut chunks = 0u64;
        for window in windows {
            chunks += 1;
            debug!("回放窗口 [{}, {})", window.start, window.end);
            for result in run_detection(&self.executor, &nodes, &root, window).await? {
                aggregated.entry(result.name).or_default().push(json!({
                    "start": window.start,
                    "end": window.end,
                    "value": result.value,
                }));
            }
        }

        let mut results = vec![TaskResult::new("chunks", json!(chunks))];
        results.extend(
            aggregated
                .into_iter()
                .map(|(name, values)| TaskResult::new(name, Value::Array(values))),
        );
        Ok(results)
    }
}
