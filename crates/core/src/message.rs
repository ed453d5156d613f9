use serde::{Deserialize, Serialize};

use crate::blob::{BlobIdentity, BlobKind, BlobVersion};
use crate::error::CoreError;
use crate::types::{ETag, FunctionId};

/// Durable payload handed from the dispatch executor to the replay executor.
///
/// The JSON shape is fixed (`functionId`, `blobType`, `containerName`,
/// `blobName`, `eTag`) so that messages written by one host version can be
/// read by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessage {
    pub function_id: FunctionId,
    #[serde(rename = "blobType", default)]
    pub blob_kind: BlobKind,
    pub container_name: String,
    pub blob_name: String,
    #[serde(rename = "eTag")]
    pub etag: ETag,
}

/// Lenient shape used while decoding so that a missing function id is
/// reported as such rather than as a generic serde error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    function_id: Option<String>,
    #[serde(rename = "blobType", default)]
    blob_kind: BlobKind,
    container_name: String,
    blob_name: String,
    #[serde(rename = "eTag")]
    etag: String,
}

impl TriggerMessage {
    pub fn new(function_id: FunctionId, blob: &BlobIdentity, etag: ETag) -> Self {
        Self {
            function_id,
            blob_kind: blob.kind,
            container_name: blob.container.clone(),
            blob_name: blob.name.clone(),
            etag,
        }
    }

    /// Build a message for a version whose ETag is known.
    pub fn from_version(function_id: FunctionId, version: &BlobVersion) -> Result<Self, CoreError> {
        let etag = version
            .etag
            .clone()
            .ok_or_else(|| CoreError::InvalidMessage(format!("no ETag known for {}", version.blob)))?;
        Ok(Self::new(function_id, &version.blob, etag))
    }

    /// The blob this message refers to.
    #[must_use]
    pub fn blob(&self) -> BlobIdentity {
        BlobIdentity::new(&self.container_name, &self.blob_name, self.blob_kind)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Decode a queue payload.
    ///
    /// Non-JSON input, a JSON `null` and a missing or empty `functionId` are
    /// all rejected.
    pub fn from_json(payload: &str) -> Result<Self, CoreError> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| CoreError::Serialization(e.to_string()))?;

        if value.is_null() {
            return Err(CoreError::InvalidMessage("message is null".into()));
        }

        let wire: WireMessage = serde_json::from_value(value)
            .map_err(|e| CoreError::InvalidMessage(e.to_string()))?;

        let function_id = match wire.function_id {
            Some(id) if !id.is_empty() => FunctionId::new(id),
            _ => return Err(CoreError::InvalidMessage("invalid function ID".into())),
        };

        Ok(Self {
            function_id,
            blob_kind: wire.blob_kind,
            container_name: wire.container_name,
            blob_name: wire.blob_name,
            etag: ETag::new(wire.etag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TriggerMessage {
        TriggerMessage::new(
            FunctionId::new("F"),
            &BlobIdentity::page("container", "dir/a.vhd"),
            ETag::new("\"E1\""),
        )
    }

    #[test]
    fn uses_fixed_field_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["functionId"], "F");
        assert_eq!(value["blobType"], "PageBlob");
        assert_eq!(value["containerName"], "container");
        assert_eq!(value["blobName"], "dir/a.vhd");
        assert_eq!(value["eTag"], "\"E1\"");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let msg = sample();
        let decoded = TriggerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.blob(), BlobIdentity::page("container", "dir/a.vhd"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            TriggerMessage::from_json("not json"),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn rejects_null() {
        let err = TriggerMessage::from_json("null").unwrap_err();
        assert!(matches!(err, CoreError::InvalidMessage(_)));
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn rejects_missing_or_empty_function_id() {
        let missing = r#"{"containerName":"c","blobName":"b","eTag":"E"}"#;
        let empty = r#"{"functionId":"","containerName":"c","blobName":"b","eTag":"E"}"#;
        for payload in [missing, empty] {
            let err = TriggerMessage::from_json(payload).unwrap_err();
            assert!(err.to_string().contains("invalid function ID"), "{err}");
        }
    }

    #[test]
    fn blob_type_defaults_to_block() {
        let payload = r#"{"functionId":"F","containerName":"c","blobName":"b","eTag":"E"}"#;
        let msg = TriggerMessage::from_json(payload).unwrap();
        assert_eq!(msg.blob_kind, BlobKind::Block);
    }

    #[test]
    fn from_version_requires_etag() {
        let version = BlobVersion::new(BlobIdentity::block("c", "b"));
        assert!(TriggerMessage::from_version(FunctionId::new("F"), &version).is_err());
        let msg =
            TriggerMessage::from_version(FunctionId::new("F"), &version.with_etag("E")).unwrap();
        assert_eq!(msg.etag.as_str(), "E");
    }
}
