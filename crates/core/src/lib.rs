//! Core value types shared by every blobwatch crate.
//!
//! Everything here is pure data: blob identities and observed versions, the
//! path patterns functions declare, and the JSON trigger message that travels
//! through the durable queue.

pub mod blob;
pub mod error;
pub mod message;
pub mod pattern;
pub mod types;

pub use blob::{BlobIdentity, BlobKind, BlobVersion};
pub use error::CoreError;
pub use message::TriggerMessage;
pub use pattern::{BlobPathPattern, PathBindings};
pub use types::{ETag, FunctionId, HostId};
