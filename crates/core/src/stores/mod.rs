pub mod filesystem;
pub mod memory;

pub use filesystem::{FsIndexStore, DEFAULT_RETAINED_GENERATIONS};
pub use memory::MemoryIndexStore;
