//! Local filesystem storage implementation

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{BinaryDataError, Result};
use crate::storage::{BinaryStorage, BinaryStream, ByteStream, PathResolver, StorageKey};

/// Stores every key as a file below the root directory
pub struct LocalFsStore {
    resolver: PathResolver,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let resolver = PathResolver::new(root);
        info!("Using local binary data directory: {}", resolver.root().display());
        Self { resolver }
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    async fn drain_into(file: &mut fs::File, mut stream: ByteStream) -> io::Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

type ChunkState = (fs::File, PathBuf);

async fn read_chunk(
    mut file: fs::File,
    path: PathBuf,
    chunk_size: usize,
) -> Result<Option<(Bytes, ChunkState)>> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let n = file
        .read(&mut buf)
        .await
        .map_err(|e| BinaryDataError::read(&path, e))?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((buf.freeze(), (file, path))))
}

#[async_trait]
impl BinaryStorage for LocalFsStore {
    fn absolute_path(&self, key: &StorageKey) -> PathBuf {
        self.resolver.absolute(key)
    }

    async fn create_dir_all(&self, key: &StorageKey) -> Result<()> {
        let path = self.absolute_path(key);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| BinaryDataError::write(&path, e))
    }

    async fn write(&self, key: &StorageKey, data: Bytes) -> Result<()> {
        let path = self.absolute_path(key);
        fs::write(&path, &data)
            .await
            .map_err(|e| BinaryDataError::write(&path, e))?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn write_stream(&self, key: &StorageKey, stream: ByteStream) -> Result<u64> {
        let path = self.absolute_path(key);
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| BinaryDataError::write(&path, e))?;

        match Self::drain_into(&mut file, stream).await {
            Ok(written) => {
                debug!("Streamed {} bytes to {}", written, path.display());
                Ok(written)
            }
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!("Failed to remove partial file {}: {}", path.display(), cleanup);
                }
                Err(BinaryDataError::write(&path, e))
            }
        }
    }

    async fn write_if_absent(&self, key: &StorageKey, data: Bytes) -> Result<bool> {
        let path = self.absolute_path(key);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(BinaryDataError::write(&path, e)),
        };
        file.write_all(&data)
            .await
            .map_err(|e| BinaryDataError::write(&path, e))?;
        file.flush()
            .await
            .map_err(|e| BinaryDataError::write(&path, e))?;
        Ok(true)
    }

    async fn import_file(&self, source: &Path, key: &StorageKey) -> Result<u64> {
        let path = self.absolute_path(key);
        fs::copy(source, &path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BinaryDataError::NotFound {
                    path: source.to_path_buf(),
                }
            } else {
                BinaryDataError::write(&path, e)
            }
        })
    }

    async fn copy(&self, from: &StorageKey, to: &StorageKey) -> Result<u64> {
        let source = self.absolute_path(from);
        let target = self.absolute_path(to);
        fs::copy(&source, &target).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BinaryDataError::NotFound { path: source.clone() }
            } else {
                BinaryDataError::write(&target, e)
            }
        })
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes> {
        let path = self.absolute_path(key);
        let data = fs::read(&path)
            .await
            .map_err(|e| BinaryDataError::read(&path, e))?;
        Ok(Bytes::from(data))
    }

    async fn open(&self, key: &StorageKey, chunk_size: usize) -> Result<BinaryStream> {
        let path = self.absolute_path(key);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| BinaryDataError::read(&path, e))?;
        let chunk_size = chunk_size.max(1);

        // the file handle is owned by the unfold state and dropped with it
        let stream = stream::try_unfold((file, path), move |(file, path)| {
            read_chunk(file, path, chunk_size)
        });
        Ok(stream.boxed())
    }

    async fn size(&self, key: &StorageKey) -> Result<u64> {
        let path = self.absolute_path(key);
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| BinaryDataError::read(&path, e))?;
        Ok(meta.len())
    }

    async fn remove(&self, key: &StorageKey) -> Result<()> {
        let path = self.absolute_path(key);
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BinaryDataError::NotFound { path: path.clone() }
            } else {
                BinaryDataError::write(&path, e)
            }
        })
    }

    async fn list(&self, dir: &StorageKey) -> Result<Vec<String>> {
        let path = self.absolute_path(dir);
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| BinaryDataError::read(&path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BinaryDataError::read(&path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| BinaryDataError::read(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!("Skipping non UTF-8 entry {:?} in {}", name, path.display()),
            }
        }
        Ok(names)
    }
}
