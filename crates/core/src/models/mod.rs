pub mod anomaly;
pub mod plan;
pub mod task;
pub mod task_info;

pub use anomaly::Anomaly;
pub use plan::{InputBinding, OutputBinding, PlanNodeSpec};
pub use task::{NewTask, Task, TaskResult, TaskStatus, TaskType};
pub use task_info::{
    DetectionTaskInfo, MonitorTaskInfo, NotificationTaskInfo, OnboardingTaskInfo, TaskInfo,
};
