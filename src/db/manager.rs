use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::{DatabaseError, DirectoryStore, PairingStore};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::db::postgres::{PostgresDirectoryStore, PostgresPairingStore};
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteDirectoryStore, SqlitePairingStore};
#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    pairing_store: Arc<dyn PairingStore>,
    directory_store: Arc<dyn DirectoryStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Postgres => "postgres",
            DbType::Sqlite => "sqlite",
        }
    }
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();
                let max_connections = config.max_connections();
                let min_connections = config.min_connections();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);

                let builder = r2d2::Pool::builder()
                    .max_size(max_connections.unwrap_or(10))
                    .min_idle(Some(min_connections.unwrap_or(1)));

                let pool = builder
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let pairing_store = Arc::new(PostgresPairingStore::new(pool.clone()));
                let directory_store = Arc::new(PostgresDirectoryStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    pairing_store,
                    directory_store,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config
                    .sqlite_path()
                    .ok_or_else(|| DatabaseError::Connection("missing sqlite path".to_string()))?;
                let path_arc = Arc::new(path.clone());

                let pairing_store = Arc::new(SqlitePairingStore::new(path_arc.clone()));
                let directory_store = Arc::new(SqliteDirectoryStore::new(path_arc));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    pairing_store,
                    directory_store,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS pairings (
                    id TEXT PRIMARY KEY,
                    mentor_uid TEXT NOT NULL,
                    student_uid TEXT NOT NULL,
                    status TEXT NOT NULL,
                    mentor_handle TEXT,
                    student_handle TEXT,
                    mentor_kind TEXT,
                    request_message TEXT,
                    decline_reason TEXT,
                    requested_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    responded_at TIMESTAMP WITH TIME ZONE,
                    ended_at TIMESTAMP WITH TIME ZONE
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS mentor_directory (
                    mentor_uid TEXT PRIMARY KEY,
                    display_name TEXT,
                    mentor_kind TEXT,
                    active BOOLEAN NOT NULL DEFAULT TRUE,
                    capacity INTEGER NOT NULL,
                    active_students INTEGER NOT NULL DEFAULT 0,
                    available_slots INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                // At most one live pairing per (mentor, student)
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_pairings_live_pair ON pairings(mentor_uid, student_uid) WHERE status IN ('pending', 'accepted')",
                "CREATE INDEX IF NOT EXISTS idx_pairings_mentor ON pairings(mentor_uid)",
                "CREATE INDEX IF NOT EXISTS idx_pairings_student ON pairings(student_uid)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS pairings (
                    id TEXT PRIMARY KEY,
                    mentor_uid TEXT NOT NULL,
                    student_uid TEXT NOT NULL,
                    status TEXT NOT NULL,
                    mentor_handle TEXT,
                    student_handle TEXT,
                    mentor_kind TEXT,
                    request_message TEXT,
                    decline_reason TEXT,
                    requested_at TEXT NOT NULL,
                    responded_at TEXT,
                    ended_at TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS mentor_directory (
                    mentor_uid TEXT PRIMARY KEY,
                    display_name TEXT,
                    mentor_kind TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    capacity INTEGER NOT NULL,
                    active_students INTEGER NOT NULL DEFAULT 0,
                    available_slots INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                // At most one live pairing per (mentor, student)
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_pairings_live_pair ON pairings(mentor_uid, student_uid) WHERE status IN ('pending', 'accepted')",
                "CREATE INDEX IF NOT EXISTS idx_pairings_mentor ON pairings(mentor_uid)",
                "CREATE INDEX IF NOT EXISTS idx_pairings_student ON pairings(student_uid)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn pairing_store(&self) -> Arc<dyn PairingStore> {
        self.pairing_store.clone()
    }

    pub fn directory_store(&self) -> Arc<dyn DirectoryStore> {
        self.directory_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::models::DirectoryUpsert;

    fn sqlite_config(path: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: None,
            conn_string: None,
            filename: Some(path.to_string()),
            max_connections: Some(1),
            min_connections: Some(1),
        }
    }

    #[tokio::test]
    async fn directory_upsert_preserves_slot_bookkeeping() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let manager = DatabaseManager::new(&sqlite_config(&db_path))
            .await
            .expect("db manager");
        manager.migrate().await.expect("migrate");

        let store = manager.directory_store();
        let created = store
            .upsert_entry(&DirectoryUpsert {
                mentor_uid: "mentor-1".to_string(),
                display_name: Some("Chiron".to_string()),
                mentor_kind: Some("centaur".to_string()),
                active: true,
                capacity: 3,
            })
            .await
            .expect("create entry");

        assert_eq!(created.active_students, 0);
        assert_eq!(created.available_slots, 3);

        let updated = store
            .upsert_entry(&DirectoryUpsert {
                mentor_uid: "mentor-1".to_string(),
                display_name: Some("Chiron the Elder".to_string()),
                mentor_kind: Some("centaur".to_string()),
                active: false,
                capacity: 5,
            })
            .await
            .expect("update entry");

        assert_eq!(updated.active_students, 0, "update must not touch the count");
        assert_eq!(updated.available_slots, 5, "slots recomputed from new capacity");
        assert!(!updated.active);
        assert_eq!(updated.display_name.as_deref(), Some("Chiron the Elder"));
        assert_eq!(updated.created_at, created.created_at);

        let listed = store.list_entries(10, 0).await.expect("list entries");
        assert_eq!(listed.len(), 1);

        // Reopen to confirm persistence
        let manager_reopened = DatabaseManager::new(&sqlite_config(&db_path))
            .await
            .expect("db manager reopened");
        manager_reopened.migrate().await.expect("migrate reopened");

        let persisted = manager_reopened
            .directory_store()
            .get_entry("mentor-1")
            .await
            .expect("query entry")
            .expect("entry exists");
        assert_eq!(persisted.capacity, 5);
    }
}
