//! Storage adapters: SQLite (libsql), in-memory, and the JSON state file.

pub mod memory_repo;
pub mod sqlite_repo;
pub mod state_json;

pub use memory_repo::MemoryRepo;
pub use sqlite_repo::SqliteRepo;
pub use state_json::StateJson;
