//! SQLite share repository
//!
//! The durable record of every share attempt. Only sealed metadata lands
//! here: filenames and MIME types arrive already encrypted, and nothing in
//! this module ever sees a plaintext value.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Lifecycle status of a share
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareStatus {
    Waiting,
    Active,
    Completed,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareStatus::Waiting => "WAITING",
            ShareStatus::Active => "ACTIVE",
            ShareStatus::Completed => "COMPLETED",
        }
    }

    fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "WAITING" => Ok(ShareStatus::Waiting),
            "ACTIVE" => Ok(ShareStatus::Active),
            "COMPLETED" => Ok(ShareStatus::Completed),
            other => Err(StorageError::Corrupt(format!("unknown status {:?}", other))),
        }
    }
}

/// One persisted share row
#[derive(Clone, Debug)]
pub struct ShareRow {
    pub id: String,
    /// Sealed envelope, never plaintext
    pub file_name: String,
    pub file_size: u64,
    /// Sealed envelope, never plaintext
    pub file_type: String,
    pub file_hash: Option<String>,
    pub code_hash: Option<String>,
    pub status: ShareStatus,
    /// Unix seconds
    pub created_at: i64,
}

/// SQLite-backed repository
pub struct ShareStore {
    conn: Mutex<Connection>,
}

impl ShareStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database for tests
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_type TEXT NOT NULL,
                file_hash TEXT,
                code_hash TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_shares_created_at ON shares(created_at);
            "#,
        )?;

        info!("Share store schema initialized");
        Ok(())
    }

    /// Insert a new share in WAITING status. The repository assigns the id.
    pub fn create(
        &self,
        sealed_name: &str,
        file_size: u64,
        sealed_type: &str,
        file_hash: Option<&str>,
        code_hash: Option<&str>,
    ) -> Result<String, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let id = Uuid::new_v4().to_string();
        let now = current_timestamp();

        conn.execute(
            "INSERT INTO shares (id, file_name, file_size, file_type, file_hash, code_hash, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                sealed_name,
                file_size as i64,
                sealed_type,
                file_hash,
                code_hash,
                ShareStatus::Waiting.as_str(),
                now,
            ],
        )?;

        debug!("Share created: {}", id);
        Ok(id)
    }

    /// Look up a share. Unknown and deleted ids both come back as `None`.
    pub fn find(&self, id: &str) -> Result<Option<ShareRow>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let row = conn
            .query_row(
                "SELECT id, file_name, file_size, file_type, file_hash, code_hash, status, created_at
                 FROM shares WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, file_name, size, file_type, file_hash, code_hash, status, created_at)) => {
                Ok(Some(ShareRow {
                    id,
                    file_name,
                    file_size: size as u64,
                    file_type,
                    file_hash,
                    code_hash,
                    status: ShareStatus::parse(&status)?,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Update a share's status.
    ///
    /// Setting the current status again is a no-op. Reviving a COMPLETED
    /// share is a constraint violation.
    pub fn set_status(&self, id: &str, status: ShareStatus) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM shares WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let current = match current {
            Some(s) => ShareStatus::parse(&s)?,
            None => return Err(StorageError::NotFound),
        };

        if current == status {
            return Ok(());
        }
        if current == ShareStatus::Completed && status == ShareStatus::Active {
            return Err(StorageError::Constraint(
                "completed share cannot become active".into(),
            ));
        }

        conn.execute(
            "UPDATE shares SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;

        debug!("Share {} status -> {}", id, status.as_str());
        Ok(())
    }

    /// Remove a share row
    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute("DELETE FROM shares WHERE id = ?1", params![id])?;
        debug!("Share deleted: {}", id);
        Ok(())
    }

    /// Delete shares created before `cutoff` (unix seconds) whose status is
    /// in `statuses`. An empty filter matches every status. Returns the
    /// number of rows removed.
    pub fn delete_older_than(
        &self,
        cutoff: i64,
        statuses: &[ShareStatus],
    ) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let count = if statuses.is_empty() {
            conn.execute("DELETE FROM shares WHERE created_at < ?1", params![cutoff])?
        } else {
            let marks: Vec<String> = (2..2 + statuses.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "DELETE FROM shares WHERE created_at < ?1 AND status IN ({})",
                marks.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<&dyn rusqlite::ToSql> = vec![&cutoff];
            let names: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
            for name in &names {
                values.push(name);
            }
            stmt.execute(values.as_slice())?
        };

        if count > 0 {
            info!("Purged {} expired shares", count);
        }
        Ok(count)
    }

    /// Total number of rows (monitoring and tests)
    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM shares", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Backdate a share's creation time. Test hook for expiry paths.
    #[doc(hidden)]
    pub fn backdate(&self, id: &str, created_at: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute(
            "UPDATE shares SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )?;
        Ok(())
    }
}

/// Current Unix timestamp in seconds
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    Database(rusqlite::Error),
    /// A thread panicked while holding the connection lock
    LockPoisoned,
    /// Row missing for an operation that requires one
    NotFound,
    /// The requested change violates a lifecycle rule
    Constraint(String),
    /// Row contents failed to parse
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        error!("Database error: {:?}", e);
        StorageError::Database(e)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Database(e) => write!(f, "Database error: {}", e),
            StorageError::LockPoisoned => {
                write!(f, "Lock poisoned: a thread panicked while holding the lock")
            }
            StorageError::NotFound => write!(f, "Share not found"),
            StorageError::Constraint(msg) => write!(f, "Constraint violation: {}", msg),
            StorageError::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}
