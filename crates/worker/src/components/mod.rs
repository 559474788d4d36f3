pub mod abort_guard;
pub mod execution_pool;
pub mod heartbeat_manager;
pub mod lease_recovery;

pub use abort_guard::AbortOnDrop;
pub use execution_pool::ExecutionPool;
pub use heartbeat_manager::HeartbeatManager;
pub use lease_recovery::LeaseRecovery;
