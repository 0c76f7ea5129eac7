//! Database handle and schema migrations
//!
//! The schema lives in `/sql/*.sql` and is embedded at compile time. Every
//! file uses `IF NOT EXISTS` so migrations are idempotent and run on each open.

use crate::error::{Result, StoreError};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema files in execution order (`00_`, `01_`, ...)
const MIGRATIONS: &[(&str, &str)] = &[
    ("00_accounts.sql", include_str!("../sql/00_accounts.sql")),
    ("01_drop_patterns.sql", include_str!("../sql/01_drop_patterns.sql")),
    ("02_drop_reports.sql", include_str!("../sql/02_drop_reports.sql")),
    ("03_drop_infos.sql", include_str!("../sql/03_drop_infos.sql")),
    ("04_matrix_elements.sql", include_str!("../sql/04_matrix_elements.sql")),
    ("05_site_stats.sql", include_str!("../sql/05_site_stats.sql")),
];

/// Run the embedded schema migrations against a connection
pub fn run_schema_migrations(conn: &Connection) -> Result<()> {
    log::info!("🔧 Running {} schema migrations", MIGRATIONS.len());

    for (filename, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", filename);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// Shared SQLite connection
///
/// Cloning shares the same connection. Open a second `Database` on the same
/// file to get an independent connection (e.g. a reader beside the worker).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file, apply PRAGMAs and migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::InvalidArgument(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ SQLite database initialized: {}", db_path.display());
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database with the full schema
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Lock the connection for the duration of the returned guard
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`
    pub fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
