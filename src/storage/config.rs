//! Configuration for binary storage backends

use crate::storage::{local_store::LocalFsStore, mock_store::MockBinaryStore, BinaryStorage};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

/// Available binary storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" | "local" => Ok(StorageBackend::Filesystem),
            "memory" | "mock" => Ok(StorageBackend::Memory),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Configuration for binary storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Root directory holding payloads, sidecars and marker directories
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            base_path: PathBuf::from("./data/binaryData"),
        }
    }
}

impl StorageConfig {
    /// Apply `BINARY_DATA_MODE` and `BINARY_DATA_STORAGE_PATH` on top of `self`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(mode) = env::var("BINARY_DATA_MODE") {
            match mode.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.backend = backend;
                }
                Err(e) => warn!("Invalid storage backend in environment: {}. Keeping {:?}.", e, self.backend),
            }
        }
        if let Ok(path) = env::var("BINARY_DATA_STORAGE_PATH") {
            info!("Using storage path from environment: {}", path);
            self.base_path = PathBuf::from(path);
        }
        self
    }

    /// Create a storage instance based on the configuration
    pub fn create_store(&self) -> Arc<dyn BinaryStorage> {
        match self.backend {
            StorageBackend::Filesystem => Arc::new(LocalFsStore::new(&self.base_path)),
            StorageBackend::Memory => {
                info!("Using in-memory binary data store");
                Arc::new(MockBinaryStore::with_root(&self.base_path))
            }
        }
    }
}
