pub mod storage;

pub use storage::MemoryBlobStorage;
