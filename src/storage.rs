//! Object stores the pack codec reads from and writes into.

mod filesystem;
mod memory;
mod traits;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;
pub use traits::{ObjectFilter, ObjectSink, ObjectSource, StoredObject};
