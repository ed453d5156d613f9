pub mod error;
pub mod storage;
pub mod testing;
pub mod types;

pub use error::StorageError;
pub use storage::BlobStorage;
pub use types::{
    BlobLookup, BlobProperties, ContinuationToken, CreateOutcome, LeaseId, LeaseOutcome,
    ListResult, ListSegment, LoggingProperties, Metadata,
};
