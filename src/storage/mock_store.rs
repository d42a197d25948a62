//! Mock implementation of BinaryStorage for testing

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use log::info;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BinaryDataError, Result};
use crate::storage::{BinaryStorage, BinaryStream, ByteStream, StorageKey};

#[derive(Default)]
struct MockState {
    files: HashMap<StorageKey, Bytes>,
    dirs: HashSet<StorageKey>,
    failing_removals: HashSet<StorageKey>,
}

/// In-memory storage keyed by `StorageKey`
///
/// Mirrors the local store's observable behaviour: writes need an existing
/// parent directory, listing a missing directory fails with `NotFound`.
#[derive(Clone)]
pub struct MockBinaryStore {
    root: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl MockBinaryStore {
    pub fn new() -> Self {
        Self::with_root("memory://binary-data")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut state = MockState::default();
        state.dirs.insert(StorageKey::root());
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored files, markers included
    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.state().files.contains_key(key)
    }

    /// Clear all files; directories are kept
    pub fn clear(&self) {
        self.state().files.clear();
    }

    /// Make every `remove` of `key` fail with a permission error
    pub fn fail_removal(&self, key: &StorageKey) {
        self.state().failing_removals.insert(key.clone());
    }

    pub fn clear_failures(&self) {
        self.state().failing_removals.clear();
    }

    fn not_found(&self, key: &StorageKey) -> BinaryDataError {
        BinaryDataError::NotFound {
            path: self.absolute_path(key),
        }
    }

    fn check_parent(&self, state: &MockState, key: &StorageKey) -> Result<()> {
        match key.parent() {
            Some(parent) if !state.dirs.contains(&parent) => Err(BinaryDataError::write(
                self.absolute_path(key),
                io::Error::from(io::ErrorKind::NotFound),
            )),
            _ => Ok(()),
        }
    }

    fn get(&self, key: &StorageKey) -> Result<Bytes> {
        self.state()
            .files
            .get(key)
            .cloned()
            .ok_or_else(|| self.not_found(key))
    }

    fn put(&self, key: &StorageKey, data: Bytes) -> Result<()> {
        let mut state = self.state();
        self.check_parent(&state, key)?;
        state.files.insert(key.clone(), data);
        Ok(())
    }
}

impl Default for MockBinaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BinaryStorage for MockBinaryStore {
    fn absolute_path(&self, key: &StorageKey) -> PathBuf {
        if key.is_root() {
            self.root.clone()
        } else {
            self.root.join(key.as_path())
        }
    }

    async fn create_dir_all(&self, key: &StorageKey) -> Result<()> {
        let mut state = self.state();
        let mut current = Some(key.clone());
        while let Some(dir) = current {
            current = dir.parent();
            state.dirs.insert(dir);
        }
        Ok(())
    }

    async fn write(&self, key: &StorageKey, data: Bytes) -> Result<()> {
        let len = data.len();
        self.put(key, data)?;
        info!("Mock: Wrote {} bytes to {}", len, key);
        Ok(())
    }

    async fn write_stream(&self, key: &StorageKey, mut stream: ByteStream) -> Result<u64> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BinaryDataError::write(self.absolute_path(key), e))?;
            buffer.extend_from_slice(&chunk);
        }
        let len = buffer.len() as u64;
        self.put(key, buffer.freeze())?;
        Ok(len)
    }

    async fn write_if_absent(&self, key: &StorageKey, data: Bytes) -> Result<bool> {
        let mut state = self.state();
        if state.files.contains_key(key) {
            return Ok(false);
        }
        self.check_parent(&state, key)?;
        state.files.insert(key.clone(), data);
        Ok(true)
    }

    async fn import_file(&self, source: &Path, key: &StorageKey) -> Result<u64> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| BinaryDataError::read(source, e))?;
        let len = data.len() as u64;
        self.put(key, Bytes::from(data))?;
        Ok(len)
    }

    async fn copy(&self, from: &StorageKey, to: &StorageKey) -> Result<u64> {
        let data = self.get(from)?;
        let len = data.len() as u64;
        self.put(to, data)?;
        Ok(len)
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes> {
        self.get(key)
    }

    async fn open(&self, key: &StorageKey, chunk_size: usize) -> Result<BinaryStream> {
        let data = self.get(key)?;
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn size(&self, key: &StorageKey) -> Result<u64> {
        Ok(self.get(key)?.len() as u64)
    }

    async fn remove(&self, key: &StorageKey) -> Result<()> {
        let mut state = self.state();
        if state.failing_removals.contains(key) {
            return Err(BinaryDataError::write(
                self.absolute_path(key),
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        match state.files.remove(key) {
            Some(_) => Ok(()),
            None => Err(self.not_found(key)),
        }
    }

    async fn list(&self, dir: &StorageKey) -> Result<Vec<String>> {
        let state = self.state();
        if !state.dirs.contains(dir) {
            return Err(self.not_found(dir));
        }
        Ok(state
            .files
            .keys()
            .filter(|key| key.parent().as_ref() == Some(dir))
            .filter_map(|key| key.file_name().map(str::to_string))
            .collect())
    }
}
