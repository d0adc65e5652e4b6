use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use specflow_common::{EntityType, Phase, Spec, SyncRecord, SyncStatus};

use crate::errors::SpecError;

/// Async-safe handle to the spec database.
///
/// Wraps `SpecDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<SpecDb>>,
}

impl DbHandle {
    pub fn new(db: SpecDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SpecDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, SpecDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Fields written to a sync record. The key is `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub github_id: Option<i64>,
    pub github_number: Option<i64>,
    pub github_node_id: Option<String>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncLogEntry {
    pub fn pending(entity_type: EntityType, entity_id: &str) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            github_id: None,
            github_number: None,
            github_node_id: None,
            status: SyncStatus::Pending,
            error_message: None,
        }
    }

    pub fn failed(entity_type: EntityType, entity_id: &str, message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Failed,
            error_message: Some(message.into()),
            ..Self::pending(entity_type, entity_id)
        }
    }
}

pub struct SpecDb {
    conn: Connection,
}

const SPEC_COLUMNS: &str = "id, name, description, phase, branch_name, created_at, updated_at";
const SYNC_COLUMNS: &str = "id, entity_type, entity_id, github_id, github_number, github_node_id, sync_status, last_synced_at, error_message";

impl SpecDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS specs (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    phase TEXT NOT NULL DEFAULT 'requirements',
                    branch_name TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sync_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    entity_type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    github_id INTEGER,
                    github_number INTEGER,
                    github_node_id TEXT,
                    sync_status TEXT NOT NULL,
                    last_synced_at TEXT NOT NULL,
                    error_message TEXT,
                    UNIQUE(entity_type, entity_id)
                );

                CREATE INDEX IF NOT EXISTS idx_specs_phase ON specs(phase);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` inside a transaction. Commits if `f` returns `Ok`, rolls back otherwise.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SpecDb) -> Result<R>,
    {
        // DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let value = f(self)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    // ── Specs ─────────────────────────────────────────────────────────

    pub fn insert_spec(&self, spec: &Spec) -> Result<Spec> {
        self.conn
            .execute(
                "INSERT INTO specs (id, name, description, phase, branch_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    spec.id,
                    spec.name,
                    spec.description,
                    spec.phase.as_str(),
                    spec.branch_name,
                    format_ts(&spec.created_at),
                    format_ts(&spec.updated_at),
                ],
            )
            .map_err(|e| integrity_or(e, "specs", "Failed to insert spec"))?;
        self.get_spec(&spec.id)?
            .context("Spec not found after insert")
    }

    pub fn get_spec(&self, id: &str) -> Result<Option<Spec>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM specs WHERE id = ?1", SPEC_COLUMNS),
                params![id],
                SpecRow::from_row,
            )
            .optional()
            .context("Failed to query spec")?;
        row.map(SpecRow::into_spec).transpose()
    }

    pub fn list_specs(&self) -> Result<Vec<Spec>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM specs ORDER BY created_at, id",
                SPEC_COLUMNS
            ))
            .context("Failed to prepare list_specs")?;
        let rows = stmt
            .query_map([], SpecRow::from_row)
            .context("Failed to query specs")?;
        let mut specs = Vec::new();
        for row in rows {
            specs.push(row.context("Failed to read spec row")?.into_spec()?);
        }
        Ok(specs)
    }

    /// All specs whose id starts with `prefix`.
    pub fn find_specs_by_prefix(&self, prefix: &str) -> Result<Vec<Spec>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM specs WHERE substr(id, 1, ?2) = ?1 ORDER BY id",
                SPEC_COLUMNS
            ))
            .context("Failed to prepare find_specs_by_prefix")?;
        let rows = stmt
            .query_map(
                params![prefix, prefix.chars().count() as i64],
                SpecRow::from_row,
            )
            .context("Failed to query specs by prefix")?;
        let mut specs = Vec::new();
        for row in rows {
            specs.push(row.context("Failed to read spec row")?.into_spec()?);
        }
        Ok(specs)
    }

    /// Resolve an id prefix to exactly one spec.
    ///
    /// Raises `SpecError::NotFound` for zero matches and `SpecError::Ambiguous`
    /// for several.
    pub fn resolve_spec_prefix(&self, prefix: &str) -> Result<Spec> {
        let mut matches = self.find_specs_by_prefix(prefix)?;
        match matches.len() {
            0 => Err(SpecError::not_found(prefix).into()),
            1 => Ok(matches.remove(0)),
            n => Err(SpecError::Ambiguous {
                prefix: prefix.to_string(),
                matches: n,
            }
            .into()),
        }
    }

    /// Set phase and `updated_at` in a single statement.
    pub fn update_spec_phase(
        &self,
        id: &str,
        phase: Phase,
        updated_at: &DateTime<Utc>,
    ) -> Result<Spec> {
        let count = self
            .conn
            .execute(
                "UPDATE specs SET phase = ?1, updated_at = ?2 WHERE id = ?3",
                params![phase.as_str(), format_ts(updated_at), id],
            )
            .context("Failed to update spec phase")?;
        if count == 0 {
            return Err(SpecError::not_found(id).into());
        }
        self.get_spec(id)?
            .context("Spec not found after phase update")
    }

    pub fn delete_spec(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM specs WHERE id = ?1", params![id])
            .context("Failed to delete spec")?;
        Ok(count > 0)
    }

    // ── Sync log ──────────────────────────────────────────────────────

    pub fn get_sync_record(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<SyncRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_log WHERE entity_type = ?1 AND entity_id = ?2",
                    SYNC_COLUMNS
                ),
                params![entity_type.as_str(), entity_id],
                SyncRow::from_row,
            )
            .optional()
            .context("Failed to query sync record")?;
        row.map(SyncRow::into_record).transpose()
    }

    pub fn count_sync_records(&self, entity_type: EntityType, entity_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sync_log WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type.as_str(), entity_id],
                |row| row.get(0),
            )
            .context("Failed to count sync records")
    }

    /// Insert a new sync record.
    ///
    /// A second record for the same key raises `SpecError::IntegrityViolation`.
    pub fn insert_sync_record(&self, entry: &SyncLogEntry) -> Result<SyncRecord> {
        self.conn
            .execute(
                "INSERT INTO sync_log (entity_type, entity_id, github_id, github_number, github_node_id, sync_status, last_synced_at, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.entity_type.as_str(),
                    entry.entity_id,
                    entry.github_id,
                    entry.github_number,
                    entry.github_node_id,
                    entry.status.as_str(),
                    format_ts(&Utc::now()),
                    entry.error_message,
                ],
            )
            .map_err(|e| integrity_or(e, "sync_log", "Failed to insert sync record"))?;
        self.get_sync_record(entry.entity_type, &entry.entity_id)?
            .context("Sync record not found after insert")
    }

    /// Overwrite every field of the existing record for the entry's key.
    pub fn update_sync_record(&self, entry: &SyncLogEntry) -> Result<SyncRecord> {
        let count = self
            .conn
            .execute(
                "UPDATE sync_log
                 SET github_id = ?1, github_number = ?2, github_node_id = ?3, sync_status = ?4, last_synced_at = ?5, error_message = ?6
                 WHERE entity_type = ?7 AND entity_id = ?8",
                params![
                    entry.github_id,
                    entry.github_number,
                    entry.github_node_id,
                    entry.status.as_str(),
                    format_ts(&Utc::now()),
                    entry.error_message,
                    entry.entity_type.as_str(),
                    entry.entity_id,
                ],
            )
            .context("Failed to update sync record")?;
        if count == 0 {
            return Err(SpecError::not_found(&entry.entity_id).into());
        }
        self.get_sync_record(entry.entity_type, &entry.entity_id)?
            .context("Sync record not found after update")
    }

    /// Update status and error only, keeping the remote linkage fields.
    pub fn update_sync_status(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<SyncRecord> {
        let count = self
            .conn
            .execute(
                "UPDATE sync_log SET sync_status = ?1, last_synced_at = ?2, error_message = ?3
                 WHERE entity_type = ?4 AND entity_id = ?5",
                params![
                    status.as_str(),
                    format_ts(&Utc::now()),
                    error_message,
                    entity_type.as_str(),
                    entity_id,
                ],
            )
            .context("Failed to update sync status")?;
        if count == 0 {
            return Err(SpecError::not_found(entity_id).into());
        }
        self.get_sync_record(entity_type, entity_id)?
            .context("Sync record not found after status update")
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn delete_sync_records(&self, entity_type: EntityType, entity_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM sync_log WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type.as_str(), entity_id],
            )
            .context("Failed to delete sync records")
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

/// Map UNIQUE / PRIMARY KEY violations to `SpecError::IntegrityViolation`;
/// everything else becomes a contextual `anyhow` error.
fn integrity_or(err: rusqlite::Error, table: &str, context: &'static str) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(code, ref message) = err
        && (code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    {
        return SpecError::IntegrityViolation {
            table: table.to_string(),
            message: message.clone().unwrap_or_else(|| code.to_string()),
        }
        .into();
    }
    anyhow::Error::new(err).context(context)
}

/// Intermediate row struct for specs.
struct SpecRow {
    id: String,
    name: String,
    description: Option<String>,
    phase: String,
    branch_name: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SpecRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            phase: row.get(3)?,
            branch_name: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_spec(self) -> Result<Spec> {
        let phase = Phase::from_str(&self.phase).context("Failed to parse spec phase")?;
        Ok(Spec {
            id: self.id,
            name: self.name,
            description: self.description,
            phase,
            branch_name: self.branch_name,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Intermediate row struct for sync_log.
struct SyncRow {
    id: i64,
    entity_type: String,
    entity_id: String,
    github_id: Option<i64>,
    github_number: Option<i64>,
    github_node_id: Option<String>,
    sync_status: String,
    last_synced_at: String,
    error_message: Option<String>,
}

impl SyncRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            github_id: row.get(3)?,
            github_number: row.get(4)?,
            github_node_id: row.get(5)?,
            sync_status: row.get(6)?,
            last_synced_at: row.get(7)?,
            error_message: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SyncRecord> {
        let entity_type = EntityType::from_str(&self.entity_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse entity type")?;
        let sync_status = SyncStatus::from_str(&self.sync_status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse sync status")?;
        Ok(SyncRecord {
            id: self.id,
            entity_type,
            entity_id: self.entity_id,
            github_id: self.github_id,
            github_number: self.github_number,
            github_node_id: self.github_node_id,
            sync_status,
            last_synced_at: parse_ts(&self.last_synced_at)?,
            error_message: self.error_message,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
