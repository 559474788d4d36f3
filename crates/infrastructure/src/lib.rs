pub mod database;
pub mod in_memory_task_store;
pub mod task_store_factory;

pub use database::{DatabaseManager, SqliteTaskStore};
pub use in_memory_task_store::InMemoryTaskStore;
pub use task_store_factory::{create_task_store, TaskStoreFactory};
