pub mod sqlite;

pub use sqlite::{DatabaseManager, DbPool, SqliteTaskStore};
