//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use anomaly_core::{InputBinding, OutputBinding, PlanNodeSpec, Task, TaskStatus, TaskType};
use chrono::{DateTime, Utc};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: 1,
                task_type: TaskType::Detection.to_string(),
                task_info: serde_json::json!({}),
                status: TaskStatus::Waiting,
                worker_id: None,
                version: 0,
                job_name: "test_job".to_string(),
                status_message: None,
                create_time: Utc::now(),
                start_time: None,
                last_active_time: None,
                end_time: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_task_info(mut self, task_info: serde_json::Value) -> Self {
        self.task.task_info = task_info;
        self
    }

    pub fn with_job_name(mut self, job_name: &str) -> Self {
        self.task.job_name = job_name.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.task.version = version;
        self
    }

    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.task.create_time = create_time;
        self
    }

    pub fn with_last_active_time(mut self, last_active_time: DateTime<Utc>) -> Self {
        self.task.last_active_time = Some(last_active_time);
        self
    }

    /// 处于 `RUNNING` 状态并由 `worker_id` 持有租约
    pub fn running_on(mut self, worker_id: i64) -> Self {
        self.task.status = TaskStatus::Running;
        self.task.worker_id = Some(worker_id);
        self.task.start_time = Some(Utc::now());
        self
    }

    pub fn started_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.task.start_time = Some(start_time);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for plan node definitions
pub struct PlanNodeSpecBuilder {
    spec: PlanNodeSpec,
}

impl PlanNodeSpecBuilder {
    pub fn new(name: &str, component_type: &str) -> Self {
        Self {
            spec: PlanNodeSpec::new(name, component_type),
        }
    }

    pub fn param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.spec.params.insert(key.to_string(), value);
        self
    }

    pub fn input(mut self, source_plan_node: &str, source_property: &str, target_property: &str) -> Self {
        self.spec.inputs.push(InputBinding::new(
            source_plan_node,
            source_property,
            target_property,
        ));
        self
    }

    /// 把上游节点的 `output` 以节点名作为输入键绑定进来
    pub fn depends_on(self, source_plan_node: &str) -> Self {
        self.input(source_plan_node, "output", source_plan_node)
    }

    pub fn output(mut self, output_key: &str, output_name: &str) -> Self {
        self.spec.outputs.push(OutputBinding {
            output_key: output_key.to_string(),
            output_name: output_name.to_string(),
        });
        self
    }

    pub fn build(self) -> PlanNodeSpec {
        self.spec
    }
}
