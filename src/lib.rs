// src/lib.rs

pub mod clock;
pub mod config;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod manager;
pub mod marker;
pub mod metadata;
pub mod storage;
pub mod sweep;

pub use config::AppConfig;
pub use error::{BinaryDataError, Result};
pub use manager::BinaryDataManager;
pub use metadata::BinaryMetadata;
pub use storage::{BinaryStorage, BinaryStream, Payload};
