//! Content-addressed storage: the shared pool and its repair service.

pub mod pool;
pub mod repair;

pub use pool::{PoolMetadata, StoragePool, StoreRequest, StoredFile};
pub use repair::{RepairReport, RepairService};
