use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blobwatch_core::{BlobIdentity, BlobVersion, ETag};

/// User-defined key/value metadata attached to a blob.
pub type Metadata = HashMap<String, String>;

/// Properties of a stored blob as returned by lookups and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    /// Identity, carrying the kind the blob was actually stored as.
    pub blob: BlobIdentity,
    pub etag: ETag,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

impl BlobProperties {
    /// The observed version described by these properties.
    #[must_use]
    pub fn version(&self) -> BlobVersion {
        BlobVersion::new(self.blob.clone())
            .with_etag(self.etag.clone())
            .with_last_modified(self.last_modified)
    }
}

/// Result of a property lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLookup {
    Found(BlobProperties),
    NotFound,
}

impl BlobLookup {
    #[must_use]
    pub fn into_found(self) -> Option<BlobProperties> {
        match self {
            Self::Found(props) => Some(props),
            Self::NotFound => None,
        }
    }
}

/// Opaque cursor returned by a paged listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a flat listing, ordered by blob name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSegment {
    pub blobs: Vec<BlobProperties>,
    /// `None` when the listing is exhausted.
    pub continuation: Option<ContinuationToken>,
}

/// Result of listing a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListResult {
    Segment(ListSegment),
    ContainerNotFound,
}

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Identifier of a held blob lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(Uuid);

impl LeaseId {
    /// Generate a fresh random lease id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a lease attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired(LeaseId),
    AlreadyLeased,
    NotFound,
}

/// Service-level request logging settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingProperties {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub retention_days: Option<u32>,
}

impl LoggingProperties {
    /// No operation class is being logged.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        !self.read && !self.write && !self.delete
    }
}
