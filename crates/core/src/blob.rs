use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::ETag;

/// The storage kind of a blob.
///
/// Serialized with the storage service's names so that trigger messages
/// stay readable by other consumers of the queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BlobKind {
    #[default]
    #[serde(rename = "BlockBlob")]
    Block,
    #[serde(rename = "PageBlob")]
    Page,
}

impl BlobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "BlockBlob",
            Self::Page => "PageBlob",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container, blob name and kind. Used as dispatch key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobIdentity {
    pub container: String,
    pub name: String,
    pub kind: BlobKind,
}

impl BlobIdentity {
    pub fn new(container: impl Into<String>, name: impl Into<String>, kind: BlobKind) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
            kind,
        }
    }

    /// Shorthand for a block blob identity.
    pub fn block(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(container, name, BlobKind::Block)
    }

    /// Shorthand for a page blob identity.
    pub fn page(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(container, name, BlobKind::Page)
    }

    /// Split `container/blob/name` on the first slash into a block blob
    /// identity.
    pub fn parse_path(path: &str) -> Result<Self, CoreError> {
        match path.split_once('/') {
            Some((container, name)) if !container.is_empty() && !name.is_empty() => {
                Ok(Self::block(container, name))
            }
            _ => Err(CoreError::InvalidPath(path.to_owned())),
        }
    }

    /// Return `container/name`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }
}

impl fmt::Display for BlobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// One observed state of a blob.
///
/// Discovery sources that only learn the path (the write log) leave `etag`
/// empty; dispatch always re-reads the current ETag before acting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobVersion {
    pub blob: BlobIdentity,
    pub etag: Option<ETag>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BlobVersion {
    pub fn new(blob: BlobIdentity) -> Self {
        Self {
            blob,
            etag: None,
            last_modified: None,
        }
    }

    #[must_use]
    pub fn with_etag(mut self, etag: impl Into<ETag>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    #[must_use]
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Two versions describe the same logical write when they refer to the
    /// same blob and carry the same known ETag.
    #[must_use]
    pub fn same_write(&self, other: &Self) -> bool {
        self.blob == other.blob && self.etag.is_some() && self.etag == other.etag
    }
}

impl From<BlobIdentity> for BlobVersion {
    fn from(blob: BlobIdentity) -> Self {
        Self::new(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_with_storage_names() {
        assert_eq!(
            serde_json::to_string(&BlobKind::Block).unwrap(),
            "\"BlockBlob\""
        );
        assert_eq!(
            serde_json::to_string(&BlobKind::Page).unwrap(),
            "\"PageBlob\""
        );
    }

    #[test]
    fn parse_path_splits_on_first_slash() {
        let id = BlobIdentity::parse_path("input/2024/01/a.csv").unwrap();
        assert_eq!(id.container, "input");
        assert_eq!(id.name, "2024/01/a.csv");
        assert_eq!(id.kind, BlobKind::Block);
        assert_eq!(id.path(), "input/2024/01/a.csv");
    }

    #[test]
    fn parse_path_rejects_missing_parts() {
        assert!(BlobIdentity::parse_path("no-slash").is_err());
        assert!(BlobIdentity::parse_path("/blob").is_err());
        assert!(BlobIdentity::parse_path("container/").is_err());
    }

    #[test]
    fn same_write_requires_known_matching_etag() {
        let blob = BlobIdentity::block("c", "b");
        let a = BlobVersion::new(blob.clone()).with_etag("E1");
        let b = BlobVersion::new(blob.clone()).with_etag("E1");
        let c = BlobVersion::new(blob.clone()).with_etag("E2");
        let unknown = BlobVersion::new(blob);

        assert!(a.same_write(&b));
        assert!(!a.same_write(&c));
        assert!(!unknown.same_write(&unknown.clone()));
    }

    #[test]
    fn identities_order_by_container_then_name_then_kind() {
        let mut blobs = vec![
            BlobIdentity::page("b", "x"),
            BlobIdentity::block("b", "x"),
            BlobIdentity::block("a", "y"),
            BlobIdentity::page("a", "x"),
        ];
        blobs.sort();
        assert_eq!(
            blobs,
            vec![
                BlobIdentity::page("a", "x"),
                BlobIdentity::block("a", "y"),
                BlobIdentity::block("b", "x"),
                BlobIdentity::page("b", "x"),
            ]
        );
        assert!(BlobKind::Block < BlobKind::Page);
    }
}
