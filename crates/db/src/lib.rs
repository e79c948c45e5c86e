pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod storage;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    AnomalyRepository, InMemoryAnomalyRepository, InMemoryStateStore, JsonDirStateStore,
    RepositoryError, SqlAnomalyRepository, SqlAnomalySink, SqlStateStore,
};
pub use storage::{open, Storage, StorageError};
