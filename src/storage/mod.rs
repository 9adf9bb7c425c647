//! Backend persistence

pub mod local;

pub use local::{LocalBackend, StorageConfig, StorageError};
