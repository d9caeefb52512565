//! libSQL storage layer for PersonaMap (local, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding crawl jobs, the URL
//! frontier, crawled pages, persona definitions, and the append-only history
//! of page↔persona mappings.
//!
//! **Access rules:**
//! - Job tasks: read-write, one connection per task via [`Storage::fork`]
//! - Reporting readers: read-only via [`Storage::open_readonly`]

mod frontier;
mod jobs;
mod mappings;
mod migrations;
mod pages;
mod personas;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use personamap_shared::{PersonaMapError, Result};

pub use mappings::{PageRecord, RecordOutcome};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Arc<Database>,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersonaMapError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        configure_connection(&conn).await?;

        let storage = Self {
            db: Arc::new(db),
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for reporting readers).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        configure_connection(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            readonly: true,
        })
    }

    /// A new handle on the same database with its own connection.
    ///
    /// Each job task works through its own fork so one job's transaction
    /// never interleaves with another's statements.
    pub async fn fork(&self) -> Result<Self> {
        let conn = self.db.connect().map_err(db_err)?;
        configure_connection(&conn).await?;
        Ok(Self {
            db: Arc::clone(&self.db),
            conn,
            readonly: self.readonly,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PersonaMapError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PersonaMapError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }
}

/// Per-connection settings. PRAGMAs that echo a value go through `query`.
async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), params![])
        .await
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn db_err(e: libsql::Error) -> PersonaMapError {
    PersonaMapError::Storage(e.to_string())
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersonaMapError::Storage(format!("invalid date '{s}': {e}")))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| parse_ts(&s).ok())
}

pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("pm_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }
}
