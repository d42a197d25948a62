//! Binary Storage Layer Abstraction
//!
//! The store never touches the filesystem directly; it talks to a
//! `BinaryStorage` backend through root-relative `StorageKey`s. The local
//! backend maps keys to files, the mock backend keeps them in memory.

pub mod config;
pub mod local_store;
pub mod mock_store;
pub mod path;


use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use self::path::{PathResolver, StorageKey};

/// Caller-supplied byte source
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Lazy, single-pass stream over a stored payload
pub type BinaryStream = BoxStream<'static, Result<Bytes>>;

/// Default read chunk size for payload streams
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Payload accepted by `store`
pub enum Payload {
    Buffer(Bytes),
    Stream(ByteStream),
}

impl Payload {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Payload::Stream(stream.boxed())
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Buffer(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Buffer(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(data: &'static [u8]) -> Self {
        Payload::Buffer(Bytes::from_static(data))
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Payload::Buffer(Bytes::from_static(data.as_bytes()))
    }
}

/// Repository interface over the storage root
#[async_trait]
pub trait BinaryStorage: Send + Sync {
    /// Location `key` maps to; diagnostic only for non-file backends
    fn absolute_path(&self, key: &StorageKey) -> PathBuf;

    /// Create a directory and its parents; existing directories are fine
    async fn create_dir_all(&self, key: &StorageKey) -> Result<()>;

    /// Write a whole buffer, replacing any previous content
    async fn write(&self, key: &StorageKey, data: Bytes) -> Result<()>;

    /// Drain `stream` into `key` and return the number of bytes written
    async fn write_stream(&self, key: &StorageKey, stream: ByteStream) -> Result<u64>;

    /// Write only if nothing exists at `key`; returns whether it wrote
    async fn write_if_absent(&self, key: &StorageKey, data: Bytes) -> Result<bool>;

    /// Copy a file from outside the store into `key`
    async fn import_file(&self, source: &Path, key: &StorageKey) -> Result<u64>;

    /// Copy one stored file to another key
    async fn copy(&self, from: &StorageKey, to: &StorageKey) -> Result<u64>;

    async fn read(&self, key: &StorageKey) -> Result<Bytes>;

    /// Open a chunked stream over `key`; the handle lives as long as the stream
    async fn open(&self, key: &StorageKey, chunk_size: usize) -> Result<BinaryStream>;

    async fn size(&self, key: &StorageKey) -> Result<u64>;

    async fn remove(&self, key: &StorageKey) -> Result<()>;

    /// Names of the regular files directly inside `dir`
    async fn list(&self, dir: &StorageKey) -> Result<Vec<String>>;
}
