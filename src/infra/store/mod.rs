//! Store backends.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::InMemoryStore;
