pub use self::error::DatabaseError;
pub use self::manager::{DatabaseManager, DbType};
pub use self::models::{DirectoryEntry, DirectoryUpsert, NewPairing, Pairing, PairingStatus};
pub use self::stores::{DirectoryStore, PairingStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
