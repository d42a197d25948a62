//! Binary data manager
//!
//! Stores payloads and their JSON sidecars under a storage root, and
//! reclaims them through two families of marker files:
//!
//! - deletion markers (`meta/`): written by `mark_for_deletion`, consumed by
//!   the deletion sweep which removes the execution's payloads and then the
//!   marker.
//! - persistence markers (`persistMeta/`): written on every store with an
//!   hour-aligned expiry, removed by the persistence sweep or released early
//!   by `persist_for_execution_id`. They never delete payloads.

use bytes::Bytes;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, TtlConfig};
use crate::error::{BinaryDataError, Result};
use crate::identifier::{belongs_to_execution, generate_identifier, metadata_file_name};
use crate::marker::{deletion_expiry, persistence_expiry, MarkerKind, MarkerName};
use crate::metadata::BinaryMetadata;
use crate::storage::{
    BinaryStorage, BinaryStream, PathResolver, Payload, StorageKey, DEFAULT_CHUNK_SIZE,
};
use crate::sweep::{SweepHandle, SweepWorker};

/// Disk-backed binary object store with TTL based cleanup
#[derive(Clone)]
pub struct BinaryDataManager {
    storage: Arc<dyn BinaryStorage>,
    resolver: PathResolver,
    clock: Arc<dyn Clock>,
    ttl: TtlConfig,
    deletion_guard: Arc<AsyncMutex<()>>,
    persistence_guard: Arc<AsyncMutex<()>>,
    workers: Arc<Mutex<Vec<SweepHandle>>>,
}

impl BinaryDataManager {
    pub fn new(storage: Arc<dyn BinaryStorage>, ttl: TtlConfig) -> Self {
        let resolver = PathResolver::new(storage.absolute_path(&StorageKey::root()));
        Self {
            storage,
            resolver,
            clock: Arc::new(SystemClock),
            ttl,
            deletion_guard: Arc::new(AsyncMutex::new(())),
            persistence_guard: Arc::new(AsyncMutex::new(())),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build the configured backend and wire a manager around it
    pub fn from_config(config: &AppConfig) -> Self {
        info!(
            "Initializing binary data manager: backend={:?}, root={}, ttl={}m, persisted_ttl={}m",
            config.storage.backend,
            config.storage.base_path.display(),
            config.ttl.binary_data_ttl,
            config.ttl.persisted_binary_data_ttl
        );
        Self::new(config.storage.create_store(), config.ttl.clone())
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Create the marker directories, clear any expired backlog and
    /// optionally start the periodic sweeps.
    pub async fn init(&self, start_sweeps: bool) -> Result<()> {
        self.storage.create_dir_all(&self.marker_dir(MarkerKind::Deletion)?).await?;
        self.storage.create_dir_all(&self.marker_dir(MarkerKind::Persistence)?).await?;

        if let Err(e) = self.delete_marked_files().await {
            error!("Initial deletion sweep failed: {}", e);
        }
        if let Err(e) = self.delete_marked_persisted_files().await {
            error!("Initial persistence sweep failed: {}", e);
        }

        if start_sweeps {
            self.start_sweeps();
        }
        Ok(())
    }

    fn start_sweeps(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if !workers.is_empty() {
            warn!("Sweep workers already running, not starting them again");
            return;
        }
        workers.push(
            SweepWorker::new(self.detached(), MarkerKind::Deletion, self.ttl.deletion_interval())
                .start_background(),
        );
        workers.push(
            SweepWorker::new(self.detached(), MarkerKind::Persistence, self.ttl.persistence_interval())
                .start_background(),
        );
    }

    /// Clone sharing storage and sweep guards but not the worker list.
    ///
    /// Workers hold one of these, so dropping the last user-facing clone
    /// drops the handles, closes their stop channels and ends the workers.
    fn detached(&self) -> Self {
        Self {
            workers: Arc::new(Mutex::new(Vec::new())),
            ..self.clone()
        }
    }

    /// Number of sweep workers currently owned by this store
    pub fn running_sweeps(&self) -> usize {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop the periodic sweeps and wait for them to exit; sweeps in flight
    /// run to completion. Dropping every clone of the manager also stops
    /// them, without waiting.
    pub async fn shutdown(&self) {
        let workers: Vec<SweepHandle> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for worker in workers {
            worker.stop().await;
        }
    }

    // ---- payloads and metadata ----

    /// Store a buffer or drain a stream into a new object owned by `execution_id`
    pub async fn store(&self, payload: impl Into<Payload>, execution_id: &str) -> Result<String> {
        let identifier = generate_identifier(execution_id);
        let key = self.object_key(&identifier)?;
        self.add_persist_marker(execution_id, &identifier).await?;

        match payload.into() {
            Payload::Buffer(data) => {
                let len = data.len();
                self.storage.write(&key, data).await?;
                debug!("Stored {} bytes as {}", len, identifier);
            }
            Payload::Stream(stream) => {
                let len = self.storage.write_stream(&key, stream).await?;
                debug!("Stored {} streamed bytes as {}", len, identifier);
            }
        }
        Ok(identifier)
    }

    /// Copy a file that already exists on disk into a new object
    pub async fn copy_binary_file(&self, source: &Path, execution_id: &str) -> Result<String> {
        let identifier = generate_identifier(execution_id);
        let key = self.object_key(&identifier)?;
        self.add_persist_marker(execution_id, &identifier).await?;

        let len = self.storage.import_file(source, &key).await?;
        debug!("Copied {} bytes from {} as {}", len, source.display(), identifier);
        Ok(identifier)
    }

    pub async fn store_metadata(&self, identifier: &str, metadata: &BinaryMetadata) -> Result<()> {
        let key = self.metadata_key(identifier)?;
        let json = serde_json::to_vec(metadata).map_err(|e| BinaryDataError::Metadata {
            path: self.storage.absolute_path(&key),
            source: e,
        })?;
        self.storage.write(&key, Bytes::from(json)).await
    }

    pub async fn get_metadata(&self, identifier: &str) -> Result<BinaryMetadata> {
        let key = self.metadata_key(identifier)?;
        let raw = self.storage.read(&key).await?;
        serde_json::from_slice(&raw).map_err(|e| BinaryDataError::Metadata {
            path: self.storage.absolute_path(&key),
            source: e,
        })
    }

    pub async fn get_size(&self, identifier: &str) -> Result<u64> {
        self.storage.size(&self.object_key(identifier)?).await
    }

    /// Open a lazy stream over the payload, `chunk_size` bytes at a time
    pub async fn open_stream(
        &self,
        identifier: &str,
        chunk_size: Option<usize>,
    ) -> Result<BinaryStream> {
        let key = self.object_key(identifier)?;
        self.storage
            .open(&key, chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE))
            .await
    }

    /// Read the whole payload into memory
    pub async fn read(&self, identifier: &str) -> Result<Bytes> {
        self.storage.read(&self.object_key(identifier)?).await
    }

    pub fn get_path(&self, identifier: &str) -> Result<PathBuf> {
        Ok(self.storage.absolute_path(&self.object_key(identifier)?))
    }

    pub fn get_metadata_path(&self, identifier: &str) -> Result<PathBuf> {
        Ok(self.storage.absolute_path(&self.metadata_key(identifier)?))
    }

    /// Copy a payload to a fresh identifier under `prefix`; metadata and
    /// markers are not copied.
    pub async fn duplicate(&self, identifier: &str, prefix: &str) -> Result<String> {
        let source = self.object_key(identifier)?;
        let new_identifier = generate_identifier(prefix);
        let target = self.object_key(&new_identifier)?;

        self.storage.copy(&source, &target).await?;
        debug!("Duplicated {} as {}", identifier, new_identifier);
        Ok(new_identifier)
    }

    // ---- deletion markers ----

    /// Schedule every object of `execution_id` for deletion after the binary TTL
    pub async fn mark_for_deletion(&self, execution_id: &str) -> Result<()> {
        let expiry = deletion_expiry(self.clock.now_millis(), self.ttl.binary_data_ttl_ms());
        let marker = MarkerName::new(MarkerKind::Deletion, execution_id, expiry);
        let key = self.marker_key(&marker)?;
        self.storage.write(&key, Bytes::new()).await?;
        debug!("Marked execution {} for deletion at {}", execution_id, expiry);
        Ok(())
    }

    /// Run the deletion sweep, waiting for a sweep already in progress
    pub async fn delete_marked_files(&self) -> Result<usize> {
        let _running = self.deletion_guard.lock().await;
        self.sweep_deletion_markers().await
    }

    /// Delete every payload and sidecar of `execution_id`, bypassing markers
    pub async fn delete_by_execution_id(&self, execution_id: &str) -> Result<()> {
        let names = self.storage.list(&StorageKey::root()).await?;
        let keys = names
            .iter()
            .filter(|name| belongs_to_execution(name, execution_id))
            .map(|name| self.resolver.resolve(&[name.as_str()]))
            .collect::<Result<Vec<_>>>()?;

        let count = keys.len();
        let results = join_all(keys.iter().map(|key| self.remove_if_present(key))).await;
        results.into_iter().collect::<Result<Vec<_>>>()?;
        debug!("Deleted {} files of execution {}", count, execution_id);
        Ok(())
    }

    /// Delete exactly one payload file
    pub async fn delete_by_identifier(&self, identifier: &str) -> Result<()> {
        self.storage.remove(&self.object_key(identifier)?).await
    }

    // ---- persistence markers ----

    /// Write the hour-bucketed persistence marker for `execution_id`.
    ///
    /// Returns `false` when a marker for the same bucket already exists.
    pub async fn add_persist_marker(&self, execution_id: &str, identifier: &str) -> Result<bool> {
        let expiry = persistence_expiry(
            self.clock.now_millis(),
            self.ttl.persisted_binary_data_ttl_ms(),
        );
        let marker = MarkerName::new(MarkerKind::Persistence, execution_id, expiry);
        let key = self.marker_key(&marker)?;
        let written = self
            .storage
            .write_if_absent(&key, Bytes::copy_from_slice(identifier.as_bytes()))
            .await?;
        if written {
            debug!("Persistence marker {} written for {}", marker.file_name(), identifier);
        }
        Ok(written)
    }

    /// Run the persistence sweep, waiting for a sweep already in progress
    pub async fn delete_marked_persisted_files(&self) -> Result<usize> {
        let _running = self.persistence_guard.lock().await;
        self.sweep_persistence_markers().await
    }

    /// Release the extended retention of `execution_id` by removing all of
    /// its persistence markers, expired or not.
    pub async fn persist_for_execution_id(&self, execution_id: &str) -> Result<()> {
        let dir = self.marker_dir(MarkerKind::Persistence)?;
        let names = self.storage.list(&dir).await?;
        let keys = names
            .iter()
            .filter(|name| {
                MarkerName::parse(MarkerKind::Persistence, name)
                    .is_some_and(|marker| marker.execution_id == execution_id)
            })
            .map(|name| self.listed_marker_key(MarkerKind::Persistence, name))
            .collect::<Result<Vec<_>>>()?;

        let results = join_all(keys.iter().map(|key| self.remove_if_present(key))).await;
        results.into_iter().collect::<Result<Vec<_>>>()?;
        debug!("Cleared {} persistence markers of execution {}", keys.len(), execution_id);
        Ok(())
    }

    // ---- sweeps ----

    /// Sweep entry point for the scheduled workers; `None` when a sweep of
    /// the same kind is still running.
    pub(crate) async fn try_sweep(&self, kind: MarkerKind) -> Option<Result<usize>> {
        match kind {
            MarkerKind::Deletion => {
                let _running = self.deletion_guard.try_lock().ok()?;
                Some(self.sweep_deletion_markers().await)
            }
            MarkerKind::Persistence => {
                let _running = self.persistence_guard.try_lock().ok()?;
                Some(self.sweep_persistence_markers().await)
            }
        }
    }

    async fn sweep_deletion_markers(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let dir = self.marker_dir(MarkerKind::Deletion)?;
        let names = self.storage.list(&dir).await?;

        // only the first expired marker of an execution purges its payloads
        let mut purged = HashSet::new();
        let mut jobs = Vec::new();
        for name in &names {
            let Some(marker) = MarkerName::parse(MarkerKind::Deletion, name) else {
                continue;
            };
            if !marker.is_expired(now) {
                continue;
            }
            let key = self.listed_marker_key(MarkerKind::Deletion, name)?;
            let purge = purged.insert(marker.execution_id.clone());
            jobs.push(self.consume_deletion_marker(marker, key, purge));
        }

        let results = join_all(jobs).await;
        self.settle(MarkerKind::Deletion, results)
    }

    async fn consume_deletion_marker(
        &self,
        marker: MarkerName,
        key: StorageKey,
        purge: bool,
    ) -> Result<()> {
        if purge {
            self.delete_by_execution_id(&marker.execution_id).await?;
        }
        self.remove_if_present(&key).await
    }

    async fn sweep_persistence_markers(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let dir = self.marker_dir(MarkerKind::Persistence)?;
        let names = self.storage.list(&dir).await?;

        let keys = names
            .iter()
            .filter(|name| {
                MarkerName::parse(MarkerKind::Persistence, name)
                    .is_some_and(|marker| marker.is_expired(now))
            })
            .map(|name| self.listed_marker_key(MarkerKind::Persistence, name))
            .collect::<Result<Vec<_>>>()?;

        let results = join_all(keys.iter().map(|key| self.remove_if_present(key))).await;
        self.settle(MarkerKind::Persistence, results)
    }

    /// Turn per-entry results into the sweep's outcome, logging each failure
    fn settle(&self, kind: MarkerKind, results: Vec<Result<()>>) -> Result<usize> {
        let total = results.len();
        let mut failed = 0;
        for err in results.into_iter().filter_map(|r| r.err()) {
            error!("{} sweep entry failed: {}", kind, err);
            failed += 1;
        }
        if failed > 0 {
            return Err(BinaryDataError::SweepFailure { kind, failed, total });
        }
        if total > 0 {
            info!("{} sweep removed {} expired markers", kind, total);
        }
        Ok(total)
    }

    // ---- keys ----

    async fn remove_if_present(&self, key: &StorageKey) -> Result<()> {
        match self.storage.remove(key).await {
            Err(e) if e.is_not_found() => {
                debug!("{} already removed", key);
                Ok(())
            }
            other => other,
        }
    }

    fn object_key(&self, identifier: &str) -> Result<StorageKey> {
        self.entry_key(None, identifier)
    }

    fn metadata_key(&self, identifier: &str) -> Result<StorageKey> {
        self.entry_key(None, &metadata_file_name(identifier))
    }

    /// Key of `name` as a single entry of `dir` (the root when `None`).
    ///
    /// Names that normalise to a different entry, such as `a/../b`, are
    /// rejected: nothing could find them again under the name they were
    /// written with.
    fn entry_key(&self, dir: Option<&str>, name: &str) -> Result<StorageKey> {
        let key = match dir {
            Some(dir) => self.resolver.resolve(&[dir, name])?,
            None => self.resolver.resolve(&[name])?,
        };
        let parent = match dir {
            Some(dir) => self.resolver.resolve(&[dir])?,
            None => StorageKey::root(),
        };
        if key.file_name() != Some(name) || key.parent() != Some(parent) {
            let path = match dir {
                Some(dir) => format!("{}/{}", dir, name),
                None => name.to_string(),
            };
            return Err(BinaryDataError::PathEscape { path });
        }
        Ok(key)
    }

    fn marker_dir(&self, kind: MarkerKind) -> Result<StorageKey> {
        self.resolver.resolve(&[kind.dir()])
    }

    /// Key of a marker file exactly as it was listed
    fn listed_marker_key(&self, kind: MarkerKind, name: &str) -> Result<StorageKey> {
        self.resolver.resolve(&[kind.dir(), name])
    }

    /// Key of a marker file; the name must stay a single entry of its directory
    fn marker_key(&self, marker: &MarkerName) -> Result<StorageKey> {
        self.entry_key(Some(marker.kind.dir()), &marker.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::marker::{HOUR_MS, MINUTE_MS};
    use crate::storage::mock_store::MockBinaryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn ttl(binary: u64, persisted: u64) -> TtlConfig {
        TtlConfig {
            binary_data_ttl: binary,
            persisted_binary_data_ttl: persisted,
        }
    }

    async fn setup(ttl: TtlConfig) -> (BinaryDataManager, MockBinaryStore, Arc<FixedClock>) {
        let store = MockBinaryStore::new();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 0).unwrap()));
        let manager = BinaryDataManager::new(Arc::new(store.clone()), ttl).with_clock(clock.clone());
        manager.init(false).await.unwrap();
        (manager, store, clock)
    }

    async fn markers(store: &MockBinaryStore, kind: MarkerKind) -> Vec<String> {
        let dir = PathResolver::new("/").resolve(&[kind.dir()]).unwrap();
        let mut names = store.list(&dir).await.unwrap();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_store_writes_payload_and_persist_marker() {
        let (manager, store, clock) = setup(ttl(60, 120)).await;

        let id = manager.store("hello", "exec1").await.unwrap();
        assert!(id.starts_with("exec1"));
        assert_eq!(manager.read(&id).await.unwrap(), Bytes::from_static(b"hello"));

        let expiry = persistence_expiry(clock.now_millis(), 120 * MINUTE_MS);
        assert_eq!(
            markers(&store, MarkerKind::Persistence).await,
            vec![format!("persistedmeta_exec1_{}", expiry)]
        );
        assert!(markers(&store, MarkerKind::Deletion).await.is_empty());
    }

    #[tokio::test]
    async fn test_persist_marker_is_written_once_per_hour_bucket() {
        let (manager, store, clock) = setup(ttl(60, 60)).await;

        assert!(manager.add_persist_marker("exec1", "exec1-a").await.unwrap());
        clock.advance(Duration::minutes(30));
        assert!(!manager.add_persist_marker("exec1", "exec1-b").await.unwrap());
        assert_eq!(markers(&store, MarkerKind::Persistence).await.len(), 1);

        // marker content is the first identifier
        let name = markers(&store, MarkerKind::Persistence).await.remove(0);
        let key = manager.resolver.resolve(&["persistMeta", name.as_str()]).unwrap();
        assert_eq!(store.read(&key).await.unwrap(), Bytes::from_static(b"exec1-a"));

        clock.advance(Duration::hours(1));
        assert!(manager.add_persist_marker("exec1", "exec1-c").await.unwrap());
        assert_eq!(markers(&store, MarkerKind::Persistence).await.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_for_deletion_accumulates_markers() {
        let (manager, store, clock) = setup(ttl(10, 60)).await;
        let start = clock.now_millis();

        manager.mark_for_deletion("exec1").await.unwrap();
        clock.advance(Duration::seconds(1));
        manager.mark_for_deletion("exec1").await.unwrap();

        let names = markers(&store, MarkerKind::Deletion).await;
        assert_eq!(names.len(), 2);
        let first = MarkerName::parse(MarkerKind::Deletion, &names[0]).unwrap();
        assert_eq!(first.execution_id, "exec1");
        assert_eq!(first.expires_at_ms, start + 10 * MINUTE_MS);
    }

    #[tokio::test]
    async fn test_deletion_sweep_purges_once_per_execution() {
        let (manager, store, clock) = setup(ttl(0, 60)).await;

        let a = manager.store("one", "exec1").await.unwrap();
        let b = manager.store("two", "exec1").await.unwrap();
        manager.store_metadata(&a, &BinaryMetadata::default()).await.unwrap();
        let other = manager.store("three", "exec2").await.unwrap();

        for _ in 0..3 {
            manager.mark_for_deletion("exec1").await.unwrap();
            clock.advance(Duration::milliseconds(5));
        }
        clock.advance(Duration::seconds(1));

        assert_eq!(manager.delete_marked_files().await.unwrap(), 3);
        assert!(manager.read(&a).await.unwrap_err().is_not_found());
        assert!(manager.read(&b).await.unwrap_err().is_not_found());
        assert!(manager.get_metadata(&a).await.unwrap_err().is_not_found());
        assert!(markers(&store, MarkerKind::Deletion).await.is_empty());
        assert_eq!(manager.read(&other).await.unwrap(), Bytes::from_static(b"three"));
    }

    #[tokio::test]
    async fn test_deletion_sweep_leaves_unexpired_and_foreign_entries() {
        let (manager, store, clock) = setup(ttl(10, 60)).await;

        let id = manager.store("keep", "exec1").await.unwrap();
        manager.mark_for_deletion("exec1").await.unwrap();
        let stray = manager.resolver.resolve(&["meta", "notes.txt"]).unwrap();
        store.write(&stray, Bytes::new()).await.unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(manager.delete_marked_files().await.unwrap(), 0);
        assert_eq!(manager.read(&id).await.unwrap(), Bytes::from_static(b"keep"));
        assert_eq!(markers(&store, MarkerKind::Deletion).await.len(), 2);

        clock.advance(Duration::minutes(6));
        assert_eq!(manager.delete_marked_files().await.unwrap(), 1);
        assert!(manager.read(&id).await.unwrap_err().is_not_found());
        assert_eq!(markers(&store, MarkerKind::Deletion).await, vec!["notes.txt"]);
    }

    #[tokio::test]
    async fn test_failed_entry_keeps_its_marker_and_fails_the_sweep() {
        let (manager, store, clock) = setup(ttl(0, 60)).await;

        let stuck = manager.store("stuck", "exec1").await.unwrap();
        let gone = manager.store("gone", "exec2").await.unwrap();
        manager.mark_for_deletion("exec1").await.unwrap();
        manager.mark_for_deletion("exec2").await.unwrap();
        clock.advance(Duration::seconds(1));

        store.fail_removal(&manager.object_key(&stuck).unwrap());
        let err = manager.delete_marked_files().await.unwrap_err();
        assert!(matches!(
            err,
            BinaryDataError::SweepFailure { kind: MarkerKind::Deletion, failed: 1, total: 2 }
        ));

        // the healthy entry completed, the failed one is left for the next pass
        assert!(manager.read(&gone).await.unwrap_err().is_not_found());
        let left = markers(&store, MarkerKind::Deletion).await;
        assert_eq!(left.len(), 1);
        assert_eq!(
            MarkerName::parse(MarkerKind::Deletion, &left[0]).unwrap().execution_id,
            "exec1"
        );

        store.clear_failures();
        assert_eq!(manager.delete_marked_files().await.unwrap(), 1);
        assert!(manager.read(&stuck).await.unwrap_err().is_not_found());
        assert!(markers(&store, MarkerKind::Deletion).await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_sweep_reports_failed_marker() {
        let (manager, store, clock) = setup(ttl(60, 0)).await;

        manager.store("a", "exec1").await.unwrap();
        manager.store("b", "exec2").await.unwrap();
        clock.advance(Duration::hours(2));

        let names = markers(&store, MarkerKind::Persistence).await;
        let blocked = manager.listed_marker_key(MarkerKind::Persistence, &names[0]).unwrap();
        store.fail_removal(&blocked);

        let err = manager.delete_marked_persisted_files().await.unwrap_err();
        assert!(matches!(
            err,
            BinaryDataError::SweepFailure { kind: MarkerKind::Persistence, failed: 1, total: 2 }
        ));
        assert_eq!(markers(&store, MarkerKind::Persistence).await, vec![names[0].clone()]);
    }

    #[tokio::test]
    async fn test_persistence_sweep_only_removes_markers() {
        let (manager, store, clock) = setup(ttl(60, 30)).await;

        let id = manager.store("payload", "exec1").await.unwrap();
        assert_eq!(manager.delete_marked_persisted_files().await.unwrap(), 0);

        clock.advance(Duration::milliseconds(HOUR_MS + 31 * MINUTE_MS));
        assert_eq!(manager.delete_marked_persisted_files().await.unwrap(), 1);
        assert!(markers(&store, MarkerKind::Persistence).await.is_empty());
        assert_eq!(manager.read(&id).await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_sweeps_remove_markers_by_listed_name() {
        let (manager, store, _clock) = setup(ttl(60, 60)).await;
        for name in ["persistMeta/persistedmeta_exec1_0001", "meta/binarymeta_exec1_0002"] {
            let key = manager.resolver.resolve(&[name]).unwrap();
            store.write(&key, Bytes::new()).await.unwrap();
        }

        assert_eq!(manager.delete_marked_persisted_files().await.unwrap(), 1);
        assert_eq!(manager.delete_marked_files().await.unwrap(), 1);
        assert!(markers(&store, MarkerKind::Persistence).await.is_empty());
        assert!(markers(&store, MarkerKind::Deletion).await.is_empty());
    }

    #[tokio::test]
    async fn test_persist_for_execution_id_clears_only_that_execution() {
        let (manager, store, clock) = setup(ttl(60, 60)).await;

        manager.store("a", "exec_1").await.unwrap();
        clock.advance(Duration::hours(1));
        manager.store("b", "exec_1").await.unwrap();
        manager.store("c", "exec").await.unwrap();
        assert_eq!(markers(&store, MarkerKind::Persistence).await.len(), 3);

        manager.persist_for_execution_id("exec_1").await.unwrap();
        let left = markers(&store, MarkerKind::Persistence).await;
        assert_eq!(left.len(), 1);
        assert!(left[0].starts_with("persistedmeta_exec_"));
        assert_eq!(
            MarkerName::parse(MarkerKind::Persistence, &left[0]).unwrap().execution_id,
            "exec"
        );
    }

    #[tokio::test]
    async fn test_delete_by_execution_id_spares_similar_prefixes() {
        let (manager, _store, _clock) = setup(ttl(60, 60)).await;

        let mine = manager.store("mine", "42").await.unwrap();
        manager.store_metadata(&mine, &BinaryMetadata::default()).await.unwrap();
        let theirs = manager.store("theirs", "420").await.unwrap();

        manager.delete_by_execution_id("42").await.unwrap();
        assert!(manager.read(&mine).await.unwrap_err().is_not_found());
        assert!(manager.get_metadata(&mine).await.unwrap_err().is_not_found());
        assert_eq!(manager.read(&theirs).await.unwrap(), Bytes::from_static(b"theirs"));
    }

    #[tokio::test]
    async fn test_delete_by_identifier_keeps_metadata() {
        let (manager, _store, _clock) = setup(ttl(60, 60)).await;

        let id = manager.store("x", "exec1").await.unwrap();
        manager.store_metadata(&id, &BinaryMetadata::new("x.txt", "text/plain", 1)).await.unwrap();

        manager.delete_by_identifier(&id).await.unwrap();
        assert!(manager.get_size(&id).await.unwrap_err().is_not_found());
        assert_eq!(manager.get_metadata(&id).await.unwrap().file_size, 1);
        assert!(manager.delete_by_identifier(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_path_escape_is_rejected_everywhere() {
        let (manager, store, _clock) = setup(ttl(60, 60)).await;
        let before = store.file_count();

        let is_escape = |r: Result<()>| matches!(r, Err(BinaryDataError::PathEscape { .. }));
        assert!(is_escape(manager.read("../secret").await.map(|_| ())));
        assert!(is_escape(manager.get_size("../../etc/passwd").await.map(|_| ())));
        assert!(is_escape(manager.delete_by_identifier("/etc/passwd").await));
        assert!(is_escape(manager.get_path("..").map(|_| ())));
        assert!(is_escape(manager.store("x", "../").await.map(|_| ())));
        assert!(is_escape(manager.mark_for_deletion("a/b").await));
        assert_eq!(store.file_count(), before);
    }

    #[tokio::test]
    async fn test_names_that_normalise_elsewhere_are_rejected() {
        let (manager, store, _clock) = setup(ttl(0, 0)).await;
        let before = store.file_count();

        let is_escape = |r: Result<()>| matches!(r, Err(BinaryDataError::PathEscape { .. }));
        assert!(is_escape(manager.store("x", "q/../y").await.map(|_| ())));
        assert!(is_escape(manager.mark_for_deletion("q/../y").await));
        assert!(is_escape(manager.add_persist_marker("q/../y", "y1").await.map(|_| ())));
        assert!(is_escape(manager.read("q/../y").await.map(|_| ())));
        assert!(is_escape(manager.store_metadata("./y", &BinaryMetadata::default()).await));
        assert_eq!(store.file_count(), before);

        assert!(markers(&store, MarkerKind::Deletion).await.is_empty());
        assert!(markers(&store, MarkerKind::Persistence).await.is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires_markers() {
        let (manager, store, clock) = setup(ttl(u64::MAX, u64::MAX)).await;

        let id = manager.store("kept", "exec1").await.unwrap();
        manager.mark_for_deletion("exec1").await.unwrap();
        let marker = markers(&store, MarkerKind::Deletion).await.remove(0);
        assert_eq!(
            MarkerName::parse(MarkerKind::Deletion, &marker).unwrap().expires_at_ms,
            i64::MAX
        );

        clock.advance(Duration::days(3650));
        assert_eq!(manager.delete_marked_files().await.unwrap(), 0);
        assert_eq!(manager.delete_marked_persisted_files().await.unwrap(), 0);
        assert_eq!(manager.read(&id).await.unwrap(), Bytes::from_static(b"kept"));

        manager.init(true).await.unwrap();
        assert_eq!(manager.running_sweeps(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_reported() {
        let (manager, store, _clock) = setup(ttl(60, 60)).await;
        let id = manager.store("x", "exec1").await.unwrap();
        let key = manager.metadata_key(&id).unwrap();
        store.write(&key, Bytes::from_static(b"{not json")).await.unwrap();

        let err = manager.get_metadata(&id).await.unwrap_err();
        assert!(matches!(err, BinaryDataError::Metadata { .. }));
    }

    #[tokio::test]
    async fn test_try_sweep_skips_while_busy() {
        let (manager, _store, _clock) = setup(ttl(60, 60)).await;

        let held = manager.deletion_guard.lock().await;
        assert!(manager.try_sweep(MarkerKind::Deletion).await.is_none());
        assert!(matches!(manager.try_sweep(MarkerKind::Persistence).await, Some(Ok(0))));
        drop(held);
        assert!(matches!(manager.try_sweep(MarkerKind::Deletion).await, Some(Ok(0))));
    }

    #[tokio::test]
    async fn test_dropping_manager_stops_workers() {
        let storage: Arc<dyn BinaryStorage> = Arc::new(MockBinaryStore::new());
        let manager = BinaryDataManager::new(Arc::clone(&storage), ttl(60, 60));
        manager.init(true).await.unwrap();
        assert_eq!(Arc::strong_count(&storage), 4);

        drop(manager);
        for _ in 0..100 {
            if Arc::strong_count(&storage) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&storage), 1);
    }

    #[tokio::test]
    async fn test_init_starts_and_shutdown_stops_workers() {
        let store = MockBinaryStore::new();
        let manager = BinaryDataManager::new(Arc::new(store), ttl(60, 60));

        manager.init(true).await.unwrap();
        assert_eq!(manager.running_sweeps(), 2);
        manager.init(true).await.unwrap();
        assert_eq!(manager.running_sweeps(), 2);

        manager.shutdown().await;
        assert_eq!(manager.running_sweeps(), 0);
    }
}
