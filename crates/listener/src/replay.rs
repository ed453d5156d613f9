//! Queue-side replay: turns a trigger message back into a function
//! invocation, deflecting messages that describe an outdated blob version.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use blobwatch_core::{BlobPathPattern, BlobVersion, FunctionId, PathBindings, TriggerMessage};

use crate::error::ListenerError;
use crate::etag::ETagReader;
use crate::metrics::ListenerMetrics;
use crate::notifications::BlobWrittenWatcher;

/// Everything a function needs to run for one blob version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub function_id: FunctionId,
    pub blob: BlobVersion,
    /// Values captured by the function's path pattern.
    pub bindings: PathBindings,
}

/// Runs a registered function.
///
/// The returned flag decides whether the trigger message is completed
/// (`true`) or handed back to the queue for redelivery (`false`).
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> bool;
}

struct ReplayRegistration {
    pattern: BlobPathPattern,
    invoker: Arc<dyn FunctionInvoker>,
}

pub struct QueueTriggerReplayer {
    registrations: RwLock<HashMap<FunctionId, Arc<ReplayRegistration>>>,
    etag_reader: Arc<dyn ETagReader>,
    watcher: Arc<dyn BlobWrittenWatcher>,
    metrics: Arc<ListenerMetrics>,
}

impl QueueTriggerReplayer {
    pub fn new(
        etag_reader: Arc<dyn ETagReader>,
        watcher: Arc<dyn BlobWrittenWatcher>,
        metrics: Arc<ListenerMetrics>,
    ) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            etag_reader,
            watcher,
            metrics,
        }
    }

    /// Route messages for `function_id` to `invoker`, replacing any
    /// previous registration.
    pub fn register(
        &self,
        function_id: FunctionId,
        pattern: BlobPathPattern,
        invoker: Arc<dyn FunctionInvoker>,
    ) {
        self.registrations
            .write()
            .insert(function_id, Arc::new(ReplayRegistration { pattern, invoker }));
    }

    /// Forget a function. Later messages for it are completed without
    /// invocation. Returns whether it was registered.
    pub fn remove(&self, function_id: &FunctionId) -> bool {
        self.registrations.write().remove(function_id).is_some()
    }

    pub fn is_registered(&self, function_id: &FunctionId) -> bool {
        self.registrations.read().contains_key(function_id)
    }

    /// Handle one trigger message payload.
    ///
    /// `Ok(true)` completes the message, `Ok(false)` asks for redelivery.
    /// Malformed payloads are errors.
    #[instrument(name = "blobwatch.replay", skip_all)]
    pub async fn execute(&self, payload: &str) -> Result<bool, ListenerError> {
        let message = TriggerMessage::from_json(payload)?;

        let registration = self.registrations.read().get(&message.function_id).cloned();
        let Some(registration) = registration else {
            debug!(function = %message.function_id, "function no longer registered");
            return Ok(true);
        };

        let blob = message.blob();
        let Some(current) = self.etag_reader.read_current(&blob).await? else {
            debug!(blob = %blob, "blob deleted before replay");
            return Ok(true);
        };

        if current.etag.as_ref() != Some(&message.etag) {
            debug!(
                blob = %blob,
                queued = %message.etag,
                "blob rewritten since dispatch; notifying current version"
            );
            self.metrics.increment_stale_deflected();
            self.watcher.notify(current);
            return Ok(true);
        }

        let bindings = registration.pattern.matches(&current.blob).unwrap_or_default();
        self.metrics.increment_invoked();
        let handled = registration
            .invoker
            .invoke(Invocation {
                function_id: message.function_id,
                blob: current,
                bindings,
            })
            .await;
        debug!(handled, "function invoked");
        Ok(handled)
    }
}
