use chrono::{DateTime, SecondsFormat, Utc};
use overseer_config::schema::StoreConfig;
use overseer_core::{GovernanceError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded retry for transient conflicts (lock contention, a lost audit CAS).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// SQLite-backed store for all governance state.
#[derive(Clone)]
pub struct GovernanceStore {
    db: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl GovernanceStore {
    /// Open or create the governance database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, Duration::from_millis(5_000), RetryPolicy::default())
    }

    /// Open using the `[store]` config section.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        Self::open_with(
            &config.db_path,
            Duration::from_millis(config.busy_timeout_ms),
            RetryPolicy::from(config),
        )
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn open_with(path: &Path, busy_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        info!(?path, "opening governance store");

        let conn = Connection::open(path).map_err(sql_err)?;
        conn.busy_timeout(busy_timeout).map_err(sql_err)?;

        // WAL lets readers proceed while a writer holds the immediate lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            retry,
        })
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction, committing on `Ok`.
    ///
    /// `f` may run more than once: transient failures roll back and retry with
    /// exponential backoff. Once retries are exhausted the error becomes `Internal`.
    /// Must not be called re-entrantly from inside `f`.
    pub fn with_tx<T>(&self, op: &str, mut f: impl FnMut(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.retrying(op, || {
            let mut conn = self.db.lock();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let value = f(&tx)?;
            tx.commit().map_err(sql_err)?;
            Ok(value)
        })
    }

    /// Run a read-only query against the connection, with the same retry policy.
    pub fn read<T>(&self, op: &str, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.retrying(op, || {
            let conn = self.db.lock();
            f(&conn)
        })
    }

    fn retrying<T>(&self, op: &str, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let mut tries = 0u32;
        loop {
            match attempt() {
                Err(e) if e.is_transient() => {
                    if tries >= self.retry.max_retries {
                        warn!(op, attempts = tries + 1, error = %e, "giving up on transient conflict");
                        return Err(GovernanceError::Internal(format!(
                            "{op}: gave up after {} attempts: {e}",
                            tries + 1
                        )));
                    }
                    let delay = self.retry.backoff * 2u32.saturating_pow(tries);
                    debug!(op, attempt = tries + 1, ?delay, error = %e, "retrying after transient conflict");
                    std::thread::sleep(delay);
                    tries += 1;
                }
                other => return other,
            }
        }
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        domain TEXT NOT NULL,
        provider TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        metadata TEXT NOT NULL DEFAULT '{}',
        started_at TEXT NOT NULL,
        ended_at TEXT,
        last_activity_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner, started_at);
    CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status, last_activity_at);

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES sessions(id),
        owner TEXT NOT NULL,
        task_type TEXT NOT NULL,
        domain TEXT NOT NULL,
        status TEXT NOT NULL,
        cost_estimate REAL NOT NULL,
        actual_cost REAL,
        requires_approval INTEGER NOT NULL DEFAULT 0,
        approval_id TEXT,
        failure_reason TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id, created_at);

    CREATE TABLE IF NOT EXISTS approvals (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL UNIQUE REFERENCES tasks(id),
        owner TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        rule_triggered TEXT,
        reason TEXT NOT NULL,
        tier INTEGER NOT NULL DEFAULT 0,
        deadline TEXT NOT NULL,
        decided_by TEXT,
        decided_at TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status, deadline);
    CREATE INDEX IF NOT EXISTS idx_approvals_owner ON approvals(owner, decided_at);

    CREATE TABLE IF NOT EXISTS rules (
        id TEXT NOT NULL,
        version INTEGER NOT NULL,
        condition TEXT NOT NULL,
        action TEXT NOT NULL,
        threshold REAL,
        enabled INTEGER NOT NULL DEFAULT 1,
        superseded INTEGER NOT NULL DEFAULT 0,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (id, version)
    );

    CREATE TABLE IF NOT EXISTS cost_records (
        owner TEXT NOT NULL,
        day TEXT NOT NULL,
        total_cost REAL NOT NULL DEFAULT 0.0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (owner, day)
    );

    CREATE TABLE IF NOT EXISTS budget_ceilings (
        owner TEXT PRIMARY KEY,
        daily_limit REAL NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        seq INTEGER NOT NULL,
        actor TEXT NOT NULL,
        action TEXT NOT NULL,
        target_type TEXT NOT NULL,
        target_id TEXT NOT NULL,
        outcome TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        prev_hash TEXT NOT NULL,
        entry_hash TEXT NOT NULL,
        UNIQUE (owner, seq)
    );
    CREATE INDEX IF NOT EXISTS idx_audit_owner_ts ON audit_log(owner, timestamp);

    CREATE TABLE IF NOT EXISTS audit_heads (
        owner TEXT PRIMARY KEY,
        head_hash TEXT NOT NULL,
        seq INTEGER NOT NULL,
        last_ts TEXT NOT NULL
    );
";

// ── Error and column helpers ───────────────────────────────────

/// Map a SQLite error, flagging lock contention as transient.
pub fn sql_err(e: rusqlite::Error) -> GovernanceError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            GovernanceError::transient(e.to_string())
        }
        _ => GovernanceError::store(e.to_string()),
    }
}

/// Whether the error is a UNIQUE / PRIMARY KEY violation.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort lexicographically.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

pub(crate) fn col_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, format!("bad uuid '{raw}': {e}")))
}

pub(crate) fn col_opt_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Uuid::parse_str(&r).map_err(|e| conversion_error(idx, format!("bad uuid '{r}': {e}"))))
        .transpose()
}

pub(crate) fn col_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn col_opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn col_json_map(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<serde_json::Map<String, serde_json::Value>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, format!("bad json: {e}")))
}

pub(crate) fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{raw}': {e}"))
}
