use std::sync::Arc;

use blobwatch_queue::MessageQueue;
use blobwatch_storage::BlobStorage;

use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::etag::{ETagReader, StorageETagReader};
use crate::listener::BlobListener;

/// Fluent builder for a [`BlobListener`].
///
/// A [`BlobStorage`] and a trigger [`MessageQueue`] must be supplied.
/// Configuration defaults to [`ListenerConfig::default`]; the poison queue
/// is optional.
#[derive(Default)]
pub struct BlobListenerBuilder {
    storage: Option<Arc<dyn BlobStorage>>,
    queue: Option<Arc<dyn MessageQueue>>,
    poison_queue: Option<Arc<dyn MessageQueue>>,
    etag_reader: Option<Arc<dyn ETagReader>>,
    config: Option<ListenerConfig>,
}

impl BlobListenerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage holding the watched containers and the receipts.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn BlobStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Queue carrying trigger messages from dispatch to replay.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Where messages go once they exceed the delivery limit.
    #[must_use]
    pub fn poison_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.poison_queue = Some(queue);
        self
    }

    /// Override how current blob versions are read. Defaults to reading
    /// blob properties from the configured storage.
    #[must_use]
    pub fn etag_reader(mut self, reader: Arc<dyn ETagReader>) -> Self {
        self.etag_reader = Some(reader);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Consume the builder and produce a [`BlobListener`].
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Configuration`] if the storage or queue is
    /// missing or the configuration does not validate.
    pub fn build(self) -> Result<BlobListener, ListenerError> {
        let storage = self
            .storage
            .ok_or_else(|| ListenerError::Configuration("blob storage is required".into()))?;

        let queue = self
            .queue
            .ok_or_else(|| ListenerError::Configuration("trigger queue is required".into()))?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let etag_reader = self
            .etag_reader
            .unwrap_or_else(|| Arc::new(StorageETagReader::new(Arc::clone(&storage))));

        Ok(BlobListener::assemble(
            storage,
            queue,
            self.poison_queue,
            etag_reader,
            &config,
        ))
    }
}
