//! Discovery by paging through container listings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use blobwatch_core::BlobVersion;
use blobwatch_storage::{BlobStorage, ContinuationToken, ListResult};

use crate::error::ListenerError;

const FULL_LISTING_PAGE_SIZE: usize = 5_000;

/// Sweep progress for one container.
///
/// A sweep cycle is one full traversal from a `None` cursor to a listing
/// without continuation. Blobs modified after `last_sweep_watermark` are new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerScanState {
    pub continuation: Option<ContinuationToken>,
    /// Latest modification time seen by the last completed cycle.
    pub last_sweep_watermark: DateTime<Utc>,
    /// Latest modification time seen so far in the current cycle.
    pub current_sweep_watermark: DateTime<Utc>,
}

impl Default for ContainerScanState {
    fn default() -> Self {
        Self {
            continuation: None,
            last_sweep_watermark: DateTime::<Utc>::MIN_UTC,
            current_sweep_watermark: DateTime::<Utc>::MIN_UTC,
        }
    }
}

pub struct ContainerSweepScanner {
    storage: Arc<dyn BlobStorage>,
}

impl ContainerSweepScanner {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    /// List one page of `container` and return the blobs modified since the
    /// last completed cycle, advancing `state`.
    ///
    /// A missing container yields nothing and leaves `state` untouched.
    pub async fn poll_new_blobs(
        &self,
        container: &str,
        state: &mut ContainerScanState,
        page_size: usize,
    ) -> Result<Vec<BlobVersion>, ListenerError> {
        if state.continuation.is_none() {
            state.current_sweep_watermark = DateTime::<Utc>::MIN_UTC;
        }

        let segment = match self
            .storage
            .list_blobs(container, None, page_size.max(1), state.continuation.as_ref())
            .await?
        {
            ListResult::Segment(segment) => segment,
            ListResult::ContainerNotFound => {
                debug!(container, "container not found during sweep");
                return Ok(Vec::new());
            }
        };

        let mut new_blobs = Vec::new();
        for props in segment.blobs {
            state.current_sweep_watermark = state.current_sweep_watermark.max(props.last_modified);
            if props.last_modified > state.last_sweep_watermark {
                new_blobs.push(props.version());
            }
        }

        state.continuation = segment.continuation;
        if state.continuation.is_none() {
            // Never move backwards, even if the newest blob was deleted.
            state.last_sweep_watermark = state
                .last_sweep_watermark
                .max(state.current_sweep_watermark);
        }

        Ok(new_blobs)
    }

    /// Every blob currently in `container`, across all pages.
    pub async fn list_all(&self, container: &str) -> Result<Vec<BlobVersion>, ListenerError> {
        let mut blobs = Vec::new();
        let mut continuation = None;

        loop {
            let segment = match self
                .storage
                .list_blobs(container, None, FULL_LISTING_PAGE_SIZE, continuation.as_ref())
                .await?
            {
                ListResult::Segment(segment) => segment,
                ListResult::ContainerNotFound => return Ok(blobs),
            };

            blobs.extend(segment.blobs.iter().map(|p| p.version()));
            match segment.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(blobs),
            }
        }
    }
}
