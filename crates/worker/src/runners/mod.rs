//! 任务执行器（TaskRunner）
//!
//! 按任务类型分发：负载先解码为 [`TaskInfo`]，再交给注册在该类型上的执行器。
//! 未知类型和未注册的执行器都只让这一次任务尝试失败。

pub mod detection;
pub mod monitor;
pub mod onboarding;

pub use detection::DetectionTaskRunner;
pub use monitor::MonitorTaskRunner;
pub use onboarding::OnboardingTaskRunner;

use std::collections::HashMap;
use std::sync::Arc;

use anomaly_core::{SchedulerError, SchedulerResult, Task, TaskInfo, TaskResult, TaskType};
use async_trait::async_trait;
use tracing::debug;

/// 执行器可见的任务上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: i64,
    pub task_type: TaskType,
    pub job_name: String,
    pub worker_id: i64,
    pub correlation_id: String,
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn execute(
        &self,
        task_info: TaskInfo,
        context: &TaskContext,
    ) -> SchedulerResult<Vec<TaskResult>>;
}

/// 任务类型 → 执行器
#[derive(Default, Clone)]
pub struct TaskRunnerRegistry {
    runners: HashMap<TaskType, Arc<dyn TaskRunner>>,
}

impl TaskRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: TaskType, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(task_type, runner);
    }

    pub fn with_runner(mut self, task_type: TaskType, runner: Arc<dyn TaskRunner>) -> Self {
        self.register(task_type, runner);
        self
    }

    pub fn get(&self, task_type: TaskType) -> SchedulerResult<Arc<dyn TaskRunner>> {
        self.runners
            .get(&task_type)
            .cloned()
            .ok_or(SchedulerError::RunnerNotRegistered(task_type))
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.runners.contains_key(&task_type)
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.runners.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// 解码负载并交给对应的执行器
    pub async fn run(&self, task: &Task, context: &TaskContext) -> SchedulerResult<Vec<TaskResult>> {
        let task_info = TaskInfo::decode(&task.task_type, &task.task_info)?;
        let runner = self.get(task_info.task_type())?;
        debug!("任务 {} 交给 {} 执行器", task.id, task_info.task_type());
        runner.execute(task_info, context).await
    }
}

/// 执行器收到的负载类型与注册类型不一致
pub(crate) fn unexpected_payload(expected: TaskType, actual: &TaskInfo) -> SchedulerError {
    SchedulerError::Internal(format!(
        "{expected} 执行器收到了 {} 类型的负载",
        actual.task_type()
    ))
}
