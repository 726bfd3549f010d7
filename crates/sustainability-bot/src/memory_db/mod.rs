//! Chat database - SQLite-backed storage for personas and messages
pub mod migration;
pub mod message_store;
pub mod persona_store;
pub mod schema;

pub use message_store::MessageStore;
pub use migration::MigrationManager;
pub use persona_store::PersonaStore;
pub use schema::*;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Persistence gateway. Each store checks out a pooled connection per operation.
pub struct ChatDatabase {
    pub messages: MessageStore,
    pub personas: PersonaStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ChatDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Chat database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Private in-memory database. The pool holds a single connection so every
    /// checkout sees the same data.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            messages: MessageStore::new(Arc::clone(&pool)),
            personas: PersonaStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn get_stats(&self) -> crate::error::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl Drop for ChatDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

/// Fixed-width UTC timestamps so text order matches time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");
        {
            let db = ChatDatabase::new(&path).unwrap();
            db.personas
                .ensure_persona("u1", &ProfileFields::default())
                .unwrap();
        }
        let db = ChatDatabase::new(&path).unwrap();
        assert!(db.personas.get_persona("u1").unwrap().is_some());
        assert_eq!(db.get_stats().unwrap().total_personas, 1);
    }

    #[test]
    fn foreign_keys_apply_to_every_pooled_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = ChatDatabase::new(&dir.path().join("fk.db")).unwrap();
        let conns: Vec<_> = (0..3).map(|_| db.pool.get().unwrap()).collect();
        for conn in &conns {
            let enabled: i64 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(enabled, 1);
        }
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        use chrono::SubsecRound;
        let early = Utc::now().trunc_subsecs(6);
        let late = early + chrono::Duration::microseconds(1);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_timestamp(&format_timestamp(early)).unwrap(), early);
    }
}
