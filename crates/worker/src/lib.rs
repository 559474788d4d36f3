pub mod acquisition;
pub mod components;
pub mod driver;
pub mod runners;

pub use acquisition::{no_task_delay, TaskAcquisitionLoop, WorkerShared};
pub use components::{AbortOnDrop, ExecutionPool, HeartbeatManager, LeaseRecovery};
pub use driver::TaskDriver;
pub use runners::{
    DetectionTaskRunner, MonitorTaskRunner, OnboardingTaskRunner, TaskContext, TaskRunner,
    TaskRunnerRegistry,
};
