//! Discovery through the storage service's request logs.
//!
//! The service writes analytics logs under `$logs/blob/YYYY/MM/DD/HH00/`.
//! Each line is a `;`-separated v1.0 record; write operations name the blob
//! they touched in the requested-object-key column.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use blobwatch_core::{BlobIdentity, BlobVersion};
use blobwatch_storage::{BlobProperties, BlobStorage, ListResult};

use crate::error::ListenerError;

/// Container the storage service writes its request logs to.
pub const LOG_CONTAINER: &str = "$logs";

const LOG_TYPE_METADATA: &str = "LogType";
const LOG_LIST_PAGE_SIZE: usize = 5_000;

const COL_REQUEST_START_TIME: usize = 1;
const COL_OPERATION_TYPE: usize = 2;
const COL_SERVICE_TYPE: usize = 10;
const COL_REQUESTED_OBJECT_KEY: usize = 12;

/// Request operation recorded in a log row. Only the operations relevant to
/// blob discovery are distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    PutBlob,
    PutBlockList,
    PutPage,
    CopyBlob,
    CopyBlobSource,
    CopyBlobDestination,
    SetBlobMetadata,
    SetBlobProperties,
    DeleteBlob,
    GetBlob,
    Other,
}

impl OperationType {
    pub fn parse(s: &str) -> Self {
        match s {
            "PutBlob" => Self::PutBlob,
            "PutBlockList" => Self::PutBlockList,
            "PutPage" => Self::PutPage,
            "CopyBlob" => Self::CopyBlob,
            "CopyBlobSource" => Self::CopyBlobSource,
            "CopyBlobDestination" => Self::CopyBlobDestination,
            "SetBlobMetadata" => Self::SetBlobMetadata,
            "SetBlobProperties" => Self::SetBlobProperties,
            "DeleteBlob" => Self::DeleteBlob,
            "GetBlob" => Self::GetBlob,
            _ => Self::Other,
        }
    }

    /// Operations that create or change a blob's content or properties.
    #[must_use]
    pub fn is_blob_write(self) -> bool {
        matches!(
            self,
            Self::PutBlob
                | Self::PutBlockList
                | Self::PutPage
                | Self::CopyBlob
                | Self::CopyBlobSource
                | Self::CopyBlobDestination
                | Self::SetBlobMetadata
                | Self::SetBlobProperties
        )
    }
}

/// One parsed request log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub request_start_time: Option<DateTime<Utc>>,
    pub operation: OperationType,
    pub service_type: String,
    pub requested_object_key: String,
}

impl LogRow {
    /// Parse a v1.0 log line. Returns `None` if the line has too few fields.
    pub fn parse(line: &str) -> Option<Self> {
        let fields = split_fields(line);
        if fields.len() <= COL_REQUESTED_OBJECT_KEY {
            return None;
        }

        Some(Self {
            request_start_time: DateTime::parse_from_rfc3339(fields[COL_REQUEST_START_TIME])
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            operation: OperationType::parse(fields[COL_OPERATION_TYPE]),
            service_type: fields[COL_SERVICE_TYPE].to_owned(),
            requested_object_key: fields[COL_REQUESTED_OBJECT_KEY].to_owned(),
        })
    }

    /// The blob named by this row, if it is a blob-service row whose key has
    /// the form `"/account/container/blob"`.
    pub fn blob_path(&self) -> Option<BlobIdentity> {
        if !self.service_type.eq_ignore_ascii_case("blob") {
            return None;
        }
        let key = self.requested_object_key.trim_matches('"');
        let (_account, path) = key.strip_prefix('/')?.split_once('/')?;
        BlobIdentity::parse_path(path).ok()
    }
}

// Quoted fields may contain ';'.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

/// Extract the blobs written according to a whole log file, in order of
/// first appearance.
pub fn parse_log_writes(contents: &str) -> Vec<BlobIdentity> {
    let mut seen = HashSet::new();
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let row = LogRow::parse(line);
            if row.is_none() {
                debug!(line, "skipping malformed log row");
            }
            row
        })
        .filter(|row| row.operation.is_blob_write())
        .filter_map(|row| row.blob_path())
        .filter(|blob| seen.insert(blob.clone()))
        .collect()
}

/// Log prefix inside [`LOG_CONTAINER`] for the hour containing `at`.
pub fn search_prefix(at: DateTime<Utc>) -> String {
    format!("blob/{}", at.format("%Y/%m/%d/%H00"))
}

/// One prefix per hour of the window, newest first.
pub fn recent_log_prefixes(now: DateTime<Utc>, window_hours: u32) -> Vec<String> {
    (0..window_hours)
        .map(|h| search_prefix(now - ChronoDuration::hours(i64::from(h))))
        .collect()
}

/// Scans recent write logs for blob writes.
///
/// Remembers which log files it has already read so each is parsed once; the
/// memory is bounded and cleared wholesale when it overflows.
pub struct StorageLogScanner {
    storage: Arc<dyn BlobStorage>,
    window_hours: u32,
    retention_days: u32,
    capacity: usize,
    scanned: Mutex<HashSet<String>>,
    logging_checked: AtomicBool,
}

impl StorageLogScanner {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        window_hours: u32,
        retention_days: u32,
        capacity: usize,
    ) -> Self {
        Self {
            storage,
            window_hours,
            retention_days,
            capacity,
            scanned: Mutex::new(HashSet::new()),
            logging_checked: AtomicBool::new(false),
        }
    }

    /// Turn on write logging if the service is logging nothing at all.
    ///
    /// Returns `true` if the settings were changed. Existing settings are
    /// never downgraded or merged into.
    pub async fn ensure_write_logging(&self) -> Result<bool, ListenerError> {
        let mut props = self.storage.logging_properties().await?;
        if !props.is_disabled() {
            return Ok(false);
        }

        props.write = true;
        props.retention_days = Some(self.retention_days);
        self.storage.set_logging_properties(props).await?;
        info!(
            retention_days = self.retention_days,
            "enabled storage write logging"
        );
        Ok(true)
    }

    /// Blobs written within the configured window, as seen from now.
    pub async fn get_recent_writes(&self) -> Result<Vec<BlobVersion>, ListenerError> {
        self.get_recent_writes_at(Utc::now()).await
    }

    pub async fn get_recent_writes_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlobVersion>, ListenerError> {
        if !self.logging_checked.load(Ordering::Acquire) {
            self.ensure_write_logging().await?;
            self.logging_checked.store(true, Ordering::Release);
        }

        let mut found = HashSet::new();
        let mut writes = Vec::new();

        for prefix in recent_log_prefixes(now, self.window_hours) {
            for log in self.list_write_logs(&prefix).await? {
                let name = log.blob.name.clone();
                if !self.mark_scanned(&name) {
                    continue;
                }

                match self.storage.read_text(&log.blob).await {
                    Ok(Some(contents)) => {
                        for blob in parse_log_writes(&contents) {
                            if found.insert(blob.clone()) {
                                writes.push(BlobVersion::new(blob));
                            }
                        }
                    }
                    Ok(None) => debug!(log = %name, "log file disappeared before it was read"),
                    Err(e) => {
                        warn!(log = %name, error = %e, "failed to read log file");
                        self.scanned.lock().remove(&name);
                    }
                }
            }
        }

        debug!(count = writes.len(), "blob writes found in logs");
        Ok(writes)
    }

    /// Number of log names currently remembered.
    pub fn scanned_count(&self) -> usize {
        self.scanned.lock().len()
    }

    fn mark_scanned(&self, name: &str) -> bool {
        let mut scanned = self.scanned.lock();
        if !scanned.insert(name.to_owned()) {
            return false;
        }
        if scanned.len() > self.capacity {
            scanned.clear();
        }
        true
    }

    async fn list_write_logs(&self, prefix: &str) -> Result<Vec<BlobProperties>, ListenerError> {
        let mut logs = Vec::new();
        let mut continuation = None;

        loop {
            let segment = match self
                .storage
                .list_blobs(
                    LOG_CONTAINER,
                    Some(prefix),
                    LOG_LIST_PAGE_SIZE,
                    continuation.as_ref(),
                )
                .await?
            {
                ListResult::Segment(segment) => segment,
                ListResult::ContainerNotFound => return Ok(logs),
            };

            logs.extend(segment.blobs.into_iter().filter(|log| {
                log.metadata
                    .get(LOG_TYPE_METADATA)
                    .is_some_and(|t| t.contains("write"))
            }));

            match segment.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(logs),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use blobwatch_storage::{LoggingProperties, Metadata};
    use blobwatch_storage_memory::MemoryBlobStorage;
    use chrono::TimeZone;

    use super::*;

    fn row(op: &str, key: &str) -> String {
        format!(
            "1.0;2024-03-05T10:15:00.1234567Z;{op};Success;201;12;12;authenticated;acct;acct;blob;\
             \"https://acct.blob.core.windows.net/{key}\";\"/acct/{key}\";0f3c;0;10.0.0.1:1234;2009-09-19"
        )
    }

    fn write_log(storage: &MemoryBlobStorage, name: &str, log_type: &str, lines: &[String]) {
        let metadata: Metadata = [(LOG_TYPE_METADATA.to_owned(), log_type.to_owned())]
            .into_iter()
            .collect();
        storage.put_blob_with_metadata(
            &BlobIdentity::block(LOG_CONTAINER, name),
            &lines.join("\n"),
            metadata,
        );
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap()
    }

    #[test]
    fn parses_write_row() {
        let parsed = LogRow::parse(&row("PutBlob", "container/dir/a.csv")).unwrap();
        assert_eq!(parsed.operation, OperationType::PutBlob);
        assert!(parsed.request_start_time.is_some());
        assert_eq!(
            parsed.blob_path(),
            Some(BlobIdentity::block("container", "dir/a.csv"))
        );
    }

    #[test]
    fn quoted_semicolons_stay_in_one_field() {
        let parsed = LogRow::parse(&row("PutBlob", "container/odd;name.csv")).unwrap();
        assert_eq!(
            parsed.blob_path(),
            Some(BlobIdentity::block("container", "odd;name.csv"))
        );
    }

    #[test]
    fn short_rows_and_non_blob_keys_are_skipped() {
        assert!(LogRow::parse("1.0;2024-03-05T10:15:00Z;PutBlob").is_none());
        let container_only = LogRow::parse(&row("PutBlob", "container")).unwrap();
        assert!(container_only.blob_path().is_none());
    }

    #[test]
    fn only_write_operations_count() {
        let contents = [
            row("GetBlob", "c/read.txt"),
            row("PutBlob", "c/a.txt"),
            row("DeleteBlob", "c/gone.txt"),
            row("SetBlobMetadata", "c/b.txt"),
            row("PutBlob", "c/a.txt"),
            "garbage".to_owned(),
        ]
        .join("\n");
        let names: Vec<_> = parse_log_writes(&contents)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn prefixes_walk_back_hourly() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 45, 0).unwrap();
        assert_eq!(
            recent_log_prefixes(at, 2),
            ["blob/2024/01/01/0000", "blob/2023/12/31/2300"]
        );
    }

    #[tokio::test]
    async fn enables_logging_only_when_off() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let scanner = StorageLogScanner::new(storage.clone(), 2, 7, 100);

        assert!(scanner.ensure_write_logging().await.unwrap());
        let props = storage.logging_properties().await.unwrap();
        assert!(props.write);
        assert_eq!(props.retention_days, Some(7));

        // Already logging something: left alone.
        let reads_only = LoggingProperties {
            read: true,
            retention_days: Some(30),
            ..LoggingProperties::default()
        };
        storage.set_logging_properties(reads_only).await.unwrap();
        assert!(!scanner.ensure_write_logging().await.unwrap());
        assert_eq!(storage.logging_properties().await.unwrap(), reads_only);
    }

    #[tokio::test]
    async fn scans_each_log_once() {
        let storage = Arc::new(MemoryBlobStorage::new());
        write_log(
            &storage,
            "blob/2024/03/05/1000/000000.log",
            "write",
            &[row("PutBlob", "input/a.csv")],
        );
        write_log(
            &storage,
            "blob/2024/03/05/0900/000000.log",
            "read,write",
            &[row("PutBlockList", "input/b.csv")],
        );
        write_log(
            &storage,
            "blob/2024/03/05/1000/000001.log",
            "read",
            &[row("PutBlob", "input/ignored.csv")],
        );
        // Outside the two-hour window.
        write_log(
            &storage,
            "blob/2024/03/05/0800/000000.log",
            "write",
            &[row("PutBlob", "input/old.csv")],
        );

        let scanner = StorageLogScanner::new(storage.clone(), 2, 7, 100);
        let first: Vec<_> = scanner
            .get_recent_writes_at(now())
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.blob.name)
            .collect();
        assert_eq!(first, ["a.csv", "b.csv"]);

        assert!(scanner.get_recent_writes_at(now()).await.unwrap().is_empty());

        write_log(
            &storage,
            "blob/2024/03/05/1000/000002.log",
            "write",
            &[row("CopyBlobDestination", "input/c.csv")],
        );
        let third = scanner.get_recent_writes_at(now()).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].blob, BlobIdentity::block("input", "c.csv"));
    }

    #[tokio::test]
    async fn seen_set_is_cleared_on_overflow() {
        let storage = Arc::new(MemoryBlobStorage::new());
        for i in 0..3 {
            write_log(
                &storage,
                &format!("blob/2024/03/05/1000/00000{i}.log"),
                "write",
                &[row("PutBlob", &format!("input/{i}.csv"))],
            );
        }

        let scanner = StorageLogScanner::new(storage.clone(), 1, 7, 2);
        assert_eq!(scanner.get_recent_writes_at(now()).await.unwrap().len(), 3);
        assert!(scanner.scanned_count() <= 2);
    }

    #[tokio::test]
    async fn missing_log_container_yields_nothing() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let scanner = StorageLogScanner::new(storage, 2, 7, 100);
        assert!(scanner.get_recent_writes_at(now()).await.unwrap().is_empty());
    }
}
