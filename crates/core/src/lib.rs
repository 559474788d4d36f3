pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{AppConfig, DatabaseConfig, ObservabilityConfig, WorkerConfig, WorkerIdentity};
pub use errors::*;
pub use logging::init_logging;
pub use models::{
    Anomaly, DetectionTaskInfo, InputBinding, MonitorTaskInfo, NewTask, NotificationTaskInfo,
    OnboardingTaskInfo, OutputBinding, PlanNodeSpec, Task, TaskInfo, TaskResult, TaskStatus,
    TaskType,
};
pub use traits::TaskStore;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
