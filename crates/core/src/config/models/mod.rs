pub mod app_config;
pub mod database;
pub mod observability;
pub mod worker;

pub use app_config::AppConfig;
pub use database::{DatabaseConfig, MEMORY_DATABASE_URL};
pub use observability::{ObservabilityConfig, SUPPORTED_LOG_FORMATS};
pub use worker::{WorkerConfig, WorkerIdentity};
