pub mod manager;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use manager::{PoolStats, ProxyStorage, StorageBackend};
