//! Data-access repositories.

mod storage;

pub use storage::{NewPoolEntry, SqlxStorageRepository, StorageRepository};
