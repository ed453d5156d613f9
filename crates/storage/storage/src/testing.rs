use std::time::Duration;

use blobwatch_core::BlobIdentity;

use crate::error::StorageError;
use crate::storage::BlobStorage;
use crate::types::{BlobLookup, CreateOutcome, LeaseId, LeaseOutcome, ListResult, Metadata};

const LEASE: Duration = Duration::from_secs(30);

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Run the full blob storage conformance test suite.
///
/// Call this from your backend's test module with a fresh, empty storage
/// instance.
///
/// # Errors
///
/// Returns an error if the backend fails an operation outright.
pub async fn run_storage_conformance_tests(
    storage: &dyn BlobStorage,
) -> Result<(), StorageError> {
    test_get_missing(storage).await?;
    test_create_if_not_exists(storage).await?;
    test_read_text(storage).await?;
    test_list_missing_container(storage).await?;
    test_list_paging(storage).await?;
    test_list_prefix(storage).await?;
    test_lease_exclusive(storage).await?;
    test_lease_missing_blob(storage).await?;
    test_set_metadata_requires_lease(storage).await?;
    test_release_is_idempotent(storage).await?;
    test_logging_properties(storage).await?;
    Ok(())
}

async fn test_get_missing(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let lookup = storage
        .get_properties(&BlobIdentity::block("conf-missing", "nothing"))
        .await?;
    assert_eq!(lookup, BlobLookup::NotFound);
    Ok(())
}

async fn test_create_if_not_exists(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-create", "receipt");
    let first = storage
        .create_if_not_exists(&blob, metadata(&[("k", "v1")]))
        .await?;
    assert_eq!(first, CreateOutcome::Created);

    let second = storage
        .create_if_not_exists(&blob, metadata(&[("k", "v2")]))
        .await?;
    assert_eq!(second, CreateOutcome::AlreadyExists);

    let BlobLookup::Found(props) = storage.get_properties(&blob).await? else {
        panic!("created blob should be found");
    };
    assert!(!props.etag.is_empty(), "etag should be assigned");
    assert_eq!(
        props.metadata.get("k").map(String::as_str),
        Some("v1"),
        "losing create must not overwrite metadata"
    );
    Ok(())
}

async fn test_read_text(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-read", "empty");
    storage.create_if_not_exists(&blob, Metadata::new()).await?;
    assert_eq!(storage.read_text(&blob).await?.as_deref(), Some(""));

    let missing = BlobIdentity::block("conf-read", "missing");
    assert!(storage.read_text(&missing).await?.is_none());
    Ok(())
}

async fn test_list_missing_container(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let result = storage.list_blobs("conf-no-such", None, 10, None).await?;
    assert_eq!(result, ListResult::ContainerNotFound);
    Ok(())
}

async fn test_list_paging(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    for name in ["e", "c", "a", "d", "b"] {
        storage
            .create_if_not_exists(&BlobIdentity::block("conf-list", name), Metadata::new())
            .await?;
    }

    let mut names = Vec::new();
    let mut continuation = None;
    let mut pages = 0;
    loop {
        let ListResult::Segment(segment) = storage
            .list_blobs("conf-list", None, 2, continuation.as_ref())
            .await?
        else {
            panic!("container should exist");
        };
        pages += 1;
        assert!(segment.blobs.len() <= 2, "page size must be respected");
        names.extend(segment.blobs.into_iter().map(|p| p.blob.name));
        match segment.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
        assert!(pages < 10, "listing should terminate");
    }

    assert_eq!(names, ["a", "b", "c", "d", "e"]);
    assert!(pages >= 3);
    Ok(())
}

async fn test_list_prefix(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    for name in ["blob/2024/01/01/0100/000000.log", "blob/2024/01/01/0200/000000.log"] {
        storage
            .create_if_not_exists(&BlobIdentity::block("conf-prefix", name), Metadata::new())
            .await?;
    }

    let ListResult::Segment(segment) = storage
        .list_blobs("conf-prefix", Some("blob/2024/01/01/0100"), 100, None)
        .await?
    else {
        panic!("container should exist");
    };
    assert_eq!(segment.blobs.len(), 1);
    assert_eq!(segment.blobs[0].blob.name, "blob/2024/01/01/0100/000000.log");
    Ok(())
}

async fn test_lease_exclusive(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-lease", "exclusive");
    storage.create_if_not_exists(&blob, Metadata::new()).await?;

    let LeaseOutcome::Acquired(lease) = storage.try_acquire_lease(&blob, LEASE).await? else {
        panic!("first lease should be acquired");
    };
    assert_eq!(
        storage.try_acquire_lease(&blob, LEASE).await?,
        LeaseOutcome::AlreadyLeased
    );

    storage.release_lease(&blob, &lease).await?;
    assert!(matches!(
        storage.try_acquire_lease(&blob, LEASE).await?,
        LeaseOutcome::Acquired(_)
    ));
    Ok(())
}

async fn test_lease_missing_blob(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-lease", "missing");
    assert_eq!(
        storage.try_acquire_lease(&blob, LEASE).await?,
        LeaseOutcome::NotFound
    );
    Ok(())
}

async fn test_set_metadata_requires_lease(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-meta", "receipt");
    storage.create_if_not_exists(&blob, Metadata::new()).await?;
    let before = storage
        .get_properties(&blob)
        .await?
        .into_found()
        .expect("blob exists");

    let LeaseOutcome::Acquired(lease) = storage.try_acquire_lease(&blob, LEASE).await? else {
        panic!("lease should be acquired");
    };

    let wrong = storage
        .set_metadata(&blob, metadata(&[("done", "true")]), &LeaseId::new())
        .await;
    assert!(
        matches!(wrong, Err(StorageError::LeaseMismatch(_))),
        "metadata update with a foreign lease must fail"
    );

    storage
        .set_metadata(&blob, metadata(&[("done", "true")]), &lease)
        .await?;
    let after = storage
        .get_properties(&blob)
        .await?
        .into_found()
        .expect("blob exists");
    assert_eq!(after.metadata.get("done").map(String::as_str), Some("true"));
    assert_ne!(before.etag, after.etag, "metadata write changes the etag");

    storage.release_lease(&blob, &lease).await?;
    Ok(())
}

async fn test_release_is_idempotent(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let blob = BlobIdentity::block("conf-release", "twice");
    storage.create_if_not_exists(&blob, Metadata::new()).await?;
    let LeaseOutcome::Acquired(lease) = storage.try_acquire_lease(&blob, LEASE).await? else {
        panic!("lease should be acquired");
    };
    storage.release_lease(&blob, &lease).await?;
    storage.release_lease(&blob, &lease).await?;
    Ok(())
}

async fn test_logging_properties(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    if !storage.supports_write_logging() {
        return Ok(());
    }

    let mut props = storage.logging_properties().await?;
    props.write = true;
    props.retention_days = Some(7);
    storage.set_logging_properties(props).await?;

    let read_back = storage.logging_properties().await?;
    assert!(read_back.write);
    assert_eq!(read_back.retention_days, Some(7));
    Ok(())
}
