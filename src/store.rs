use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

use crate::error::{OperationError, StoreError};
use crate::log_warn;
use crate::types::{RecordHandle, RecordKey, TrackingRecord};

/// Default number of keys returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of a listing. `next_marker` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub handles: Vec<RecordHandle>,
    pub next_marker: Option<String>,
}

/// Object store holding tracking records. Enables in-memory doubles in tests.
pub trait RecordStore: Send + Sync {
    /// List keys strictly after `marker`, in ascending key order.
    fn list_page(
        &self,
        marker: Option<&str>,
    ) -> impl Future<Output = Result<RecordPage, StoreError>> + Send;

    fn read(&self, handle: &RecordHandle)
        -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;

    /// Remove a record. Removing an absent record succeeds.
    fn delete(&self, handle: &RecordHandle)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Pending operations for one cycle, grouped repository → operation id → handle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingOperations {
    pub by_repository: BTreeMap<String, BTreeMap<String, RecordHandle>>,
    /// Keys that did not parse as `repository/operationId`. Never processed.
    pub malformed: Vec<RecordHandle>,
}

impl PendingOperations {
    pub fn operation_count(&self) -> usize {
        self.by_repository.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_repository.is_empty()
    }
}

/// Enumerate every stored record, following markers until the last page.
pub async fn list_pending<S: RecordStore>(store: &S) -> Result<Vec<RecordHandle>, StoreError> {
    let mut handles = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let page = store.list_page(marker.as_deref()).await?;
        handles.extend(page.handles);

        match page.next_marker {
            Some(next) => {
                // A marker that does not advance would loop forever
                if marker.as_deref() == Some(next.as_str()) {
                    return Err(StoreError::InvalidMarker(next));
                }
                marker = Some(next);
            }
            None => break,
        }
    }

    Ok(handles)
}

/// Group handles by repository. Malformed keys are filtered out, not reported as errors.
pub fn group_by_repository(handles: Vec<RecordHandle>) -> PendingOperations {
    let mut pending = PendingOperations::default();

    for handle in handles {
        match RecordKey::parse(handle.key()) {
            Some(key) => {
                pending
                    .by_repository
                    .entry(key.repository)
                    .or_default()
                    .insert(key.operation_id, handle);
            }
            None => pending.malformed.push(handle),
        }
    }

    pending
}

/// Read and deserialize a tracking record.
pub async fn read_record<S: RecordStore>(
    store: &S,
    handle: &RecordHandle,
) -> Result<TrackingRecord, OperationError> {
    let bytes = store.read(handle).await.map_err(OperationError::Read)?;
    serde_json::from_slice(&bytes).map_err(OperationError::Decode)
}

// --- Filesystem backend ---

/// Tracking records stored as files under `{root}/{container}/{repository}/{operationId}`.
///
/// A listing that starts without a marker walks the container once and keeps the
/// sorted key set; later pages slice that snapshot, so a marker is simply the last
/// key of the previous page. Dotfiles are ignored; `put` writes through a hidden
/// temp file and renames it into place.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    container_dir: PathBuf,
    page_size: usize,
    snapshot: Arc<Mutex<Option<Arc<Vec<String>>>>>,
}

impl FsRecordStore {
    pub fn new(root: &Path, container: &str, page_size: usize) -> Self {
        Self {
            container_dir: root.join(container),
            page_size: page_size.max(1),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    /// Write a record under `key`, creating the container if needed.
    pub fn put(&self, key: &str, record: &TrackingRecord) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Backend(format!("Failed to serialize record {}: {}", key, e)))?;
        write_atomic(&path, &json)
    }

    /// Write raw bytes under `key` (used to stage malformed payloads).
    pub fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        write_atomic(&path, bytes)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.container_dir.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::Backend(format!(
                    "Key '{}' cannot be mapped to a file path",
                    key
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn cached_keys(&self) -> Option<Arc<Vec<String>>> {
        self.snapshot.lock().ok().and_then(|snapshot| snapshot.clone())
    }

    fn store_snapshot(&self, keys: Arc<Vec<String>>) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = Some(keys);
        }
    }
}

impl RecordStore for FsRecordStore {
    async fn list_page(&self, marker: Option<&str>) -> Result<RecordPage, StoreError> {
        let cached = match marker {
            Some(_) => self.cached_keys(),
            None => None,
        };

        let keys = match cached {
            Some(keys) => keys,
            None => {
                let dir = self.container_dir.clone();
                let keys = tokio::task::spawn_blocking(move || collect_keys(&dir))
                    .await
                    .map_err(|e| StoreError::Backend(format!("Listing task panicked: {}", e)))??;
                let keys = Arc::new(keys);
                self.store_snapshot(Arc::clone(&keys));
                keys
            }
        };

        Ok(paginate(&keys, marker, self.page_size))
    }

    async fn read(&self, handle: &RecordHandle) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(handle.key())?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(handle.key().to_string())
            } else {
                StoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })
    }

    async fn delete(&self, handle: &RecordHandle) -> Result<(), StoreError> {
        let path = self.path_for(handle.key())?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Backend(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(io_err)?;

    let temp_file = NamedTempFile::new_in(parent).map_err(io_err)?;
    fs::write(temp_file.path(), bytes).map_err(io_err)?;
    temp_file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Walk the container and return every record key, sorted.
fn collect_keys(container_dir: &Path) -> Result<Vec<String>, StoreError> {
    if !container_dir.is_dir() {
        return Err(StoreError::NotFound(format!(
            "container {}",
            container_dir.display()
        )));
    }

    let mut keys = Vec::new();
    let mut pending_dirs = vec![(container_dir.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending_dirs.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                log_warn!(
                    "[store] Skipping non-UTF-8 entry in {}",
                    dir.display()
                );
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let key = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let file_type = entry.file_type().map_err(|e| StoreError::Io {
                path: entry.path().display().to_string(),
                source: e,
            })?;
            if file_type.is_dir() {
                pending_dirs.push((entry.path(), key));
            } else {
                keys.push(key);
            }
        }
    }

    keys.sort();
    Ok(keys)
}

fn paginate(sorted_keys: &[String], marker: Option<&str>, page_size: usize) -> RecordPage {
    let start = match marker {
        Some(m) => sorted_keys.partition_point(|k| k.as_str() <= m),
        None => 0,
    };
    let end = (start + page_size).min(sorted_keys.len());
    let handles: Vec<RecordHandle> = sorted_keys[start..end]
        .iter()
        .map(RecordHandle::new)
        .collect();
    let next_marker = if end < sorted_keys.len() {
        handles.last().map(|h| h.key().to_string())
    } else {
        None
    };

    RecordPage {
        handles,
        next_marker,
    }
}

// --- In-memory backend ---

/// In-process record store for tests and dry runs.
///
/// Supports failure injection per key and records every successful delete in order.
#[derive(Debug)]
pub struct MemoryRecordStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    fail_listing: Mutex<Option<String>>,
    fail_reads: Mutex<HashSet<String>>,
    fail_deletes: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    pages_served: AtomicUsize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryRecordStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            fail_listing: Mutex::new(None),
            fail_reads: Mutex::new(HashSet::new()),
            fail_deletes: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
            pages_served: AtomicUsize::new(0),
        }
    }

    pub fn insert_record(&self, key: &str, record: &TrackingRecord) {
        let bytes = serde_json::to_vec(record).unwrap_or_default();
        self.insert_raw(key, bytes);
    }

    pub fn insert_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), bytes.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every subsequent listing fail with `message`.
    pub fn fail_listing(&self, message: &str) {
        if let Ok(mut fail) = self.fail_listing.lock() {
            *fail = Some(message.to_string());
        }
    }

    pub fn fail_read(&self, key: &str) {
        if let Ok(mut keys) = self.fail_reads.lock() {
            keys.insert(key.to_string());
        }
    }

    pub fn fail_delete(&self, key: &str) {
        if let Ok(mut keys) = self.fail_deletes.lock() {
            keys.insert(key.to_string());
        }
    }

    /// Keys removed through `delete`, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted
            .lock()
            .map(|deleted| deleted.clone())
            .unwrap_or_default()
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::Relaxed)
    }

    fn injected(set: &Mutex<HashSet<String>>, key: &str) -> bool {
        set.lock().map(|keys| keys.contains(key)).unwrap_or(false)
    }

    fn lock_objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryRecordStore {
    async fn list_page(&self, marker: Option<&str>) -> Result<RecordPage, StoreError> {
        if let Ok(fail) = self.fail_listing.lock() {
            if let Some(message) = fail.as_ref() {
                return Err(StoreError::Backend(message.clone()));
            }
        }

        let keys: Vec<String> = self.lock_objects()?.keys().cloned().collect();
        self.pages_served.fetch_add(1, Ordering::Relaxed);
        Ok(paginate(&keys, marker, self.page_size))
    }

    async fn read(&self, handle: &RecordHandle) -> Result<Vec<u8>, StoreError> {
        if Self::injected(&self.fail_reads, handle.key()) {
            return Err(StoreError::Backend(format!(
                "injected read failure for {}",
                handle
            )));
        }
        self.lock_objects()?
            .get(handle.key())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(handle.key().to_string()))
    }

    async fn delete(&self, handle: &RecordHandle) -> Result<(), StoreError> {
        if Self::injected(&self.fail_deletes, handle.key()) {
            return Err(StoreError::Backend(format!(
                "injected delete failure for {}",
                handle
            )));
        }
        self.lock_objects()?.remove(handle.key());
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(handle.key().to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn paginate_walks_sorted_keys_by_marker() {
        let all = keys(&["a/1", "a/2", "b/1", "c/9", "malformed"]);

        let first = paginate(&all, None, 2);
        assert_eq!(first.handles, vec![RecordHandle::new("a/1"), RecordHandle::new("a/2")]);
        assert_eq!(first.next_marker.as_deref(), Some("a/2"));

        let second = paginate(&all, first.next_marker.as_deref(), 2);
        assert_eq!(second.handles, vec![RecordHandle::new("b/1"), RecordHandle::new("c/9")]);

        let last = paginate(&all, second.next_marker.as_deref(), 2);
        assert_eq!(last.handles, vec![RecordHandle::new("malformed")]);
        assert_eq!(last.next_marker, None);
    }

    #[test]
    fn paginate_exact_page_boundary_has_no_next_marker() {
        let all = keys(&["a/1", "a/2"]);
        let page = paginate(&all, None, 2);
        assert_eq!(page.handles.len(), 2);
        assert_eq!(page.next_marker, None);
    }

    #[test]
    fn path_for_rejects_traversal_segments() {
        let store = FsRecordStore::new(Path::new("/tmp/root"), "ops", 10);
        assert!(store.path_for("repo/../etc").is_err());
        assert!(store.path_for("repo//op").is_err());
        assert_eq!(
            store.path_for("repo/op").unwrap(),
            PathBuf::from("/tmp/root/ops/repo/op")
        );
    }
}
