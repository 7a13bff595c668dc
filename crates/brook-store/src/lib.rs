//! Key-value store backends for wallet state.
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions
//! - [`FileStore`]: a single JSON document on disk, replaced atomically

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
