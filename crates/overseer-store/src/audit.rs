//! Per-owner hash-chained audit log.
//!
//! Each owner has an independent chain. The head (`audit_heads`) is advanced
//! by compare-and-swap inside the caller's transaction; losing the CAS is a
//! transient conflict that [`crate::GovernanceStore::with_tx`] retries.

use chrono::{DateTime, Utc};
use overseer_core::{
    AuditEntry, AuditOutcome, ChainReport, GENESIS_HASH, GovernanceError, Owner, Result,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{col_ts, col_uuid, conversion_error, is_constraint_violation, parse_ts, sql_err, ts};

/// An audit entry before it is sequenced and hashed.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub owner: Owner,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub outcome: AuditOutcome,
    pub payload: Value,
}

impl AuditRecord {
    pub fn success(
        owner: impl Into<String>,
        actor: impl Into<String>,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl ToString,
        payload: Value,
    ) -> Self {
        Self {
            owner: owner.into(),
            actor: actor.into(),
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.to_string(),
            outcome: AuditOutcome::Success,
            payload,
        }
    }

    /// A rejected attempt. The payload records the error code and message.
    pub fn failed(
        owner: impl Into<String>,
        actor: impl Into<String>,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl ToString,
        error: &GovernanceError,
    ) -> Self {
        Self {
            owner: owner.into(),
            actor: actor.into(),
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.to_string(),
            outcome: AuditOutcome::Failed,
            payload: serde_json::json!({
                "code": error.code(),
                "message": error.to_string(),
            }),
        }
    }
}

/// Hash of the canonical payload text.
pub fn payload_hash(payload_json: &str) -> String {
    blake3::hash(payload_json.as_bytes()).to_hex().to_string()
}

/// Chain hash over every field that identifies the entry.
#[allow(clippy::too_many_arguments)]
pub fn entry_hash(
    prev_hash: &str,
    seq: u64,
    owner: &str,
    actor: &str,
    action: &str,
    target_type: &str,
    target_id: &str,
    timestamp: &str,
    outcome: &str,
    payload_hash: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    let seq = seq.to_string();
    let fields = [
        prev_hash,
        seq.as_str(),
        owner,
        actor,
        action,
        target_type,
        target_id,
        timestamp,
        outcome,
        payload_hash,
    ];
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Append one entry to the owner's chain. Must run inside the transaction
/// that performs the transition being recorded.
pub fn append(conn: &Connection, record: &AuditRecord, now: DateTime<Utc>) -> Result<AuditEntry> {
    let head: Option<(String, i64, String)> = conn
        .query_row(
            "SELECT head_hash, seq, last_ts FROM audit_heads WHERE owner = ?1",
            params![record.owner],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(sql_err)?;

    let (prev_hash, prev_seq, last_ts) = match head {
        Some((hash, seq, last)) => {
            let last = parse_ts(&last).map_err(GovernanceError::store)?;
            (hash, seq as u64, Some(last))
        }
        None => (GENESIS_HASH.to_string(), 0, None),
    };

    // Keep timestamps non-decreasing along a chain even if the wall clock steps back
    let timestamp = match last_ts {
        Some(last) if last > now => last,
        _ => now,
    };
    let seq = prev_seq + 1;
    let timestamp_str = ts(timestamp);
    let payload_json = serde_json::to_string(&record.payload)?;
    let payload_hash = payload_hash(&payload_json);
    let outcome = record.outcome.as_str();
    let entry_hash = entry_hash(
        &prev_hash,
        seq,
        &record.owner,
        &record.actor,
        &record.action,
        &record.target_type,
        &record.target_id,
        &timestamp_str,
        outcome,
        &payload_hash,
    );
    let id = Uuid::new_v4();

    let inserted = conn.execute(
        "INSERT INTO audit_log (id, owner, seq, actor, action, target_type, target_id, outcome,
                                timestamp, payload, payload_hash, prev_hash, entry_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id.to_string(),
            record.owner,
            seq as i64,
            record.actor,
            record.action,
            record.target_type,
            record.target_id,
            outcome,
            timestamp_str,
            payload_json,
            payload_hash,
            prev_hash,
            entry_hash,
        ],
    );
    if let Err(e) = inserted {
        if is_constraint_violation(&e) {
            return Err(GovernanceError::transient(format!(
                "audit seq {seq} for {} already taken",
                record.owner
            )));
        }
        return Err(sql_err(e));
    }

    let advanced = if prev_seq == 0 {
        conn.execute(
            "INSERT INTO audit_heads (owner, head_hash, seq, last_ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner) DO NOTHING",
            params![record.owner, entry_hash, seq as i64, timestamp_str],
        )
    } else {
        conn.execute(
            "UPDATE audit_heads SET head_hash = ?1, seq = ?2, last_ts = ?3
             WHERE owner = ?4 AND head_hash = ?5",
            params![entry_hash, seq as i64, timestamp_str, record.owner, prev_hash],
        )
    }
    .map_err(sql_err)?;

    if advanced == 0 {
        debug!(owner = %record.owner, seq, "audit head moved underneath append");
        return Err(GovernanceError::transient(format!(
            "audit chain head for {} moved",
            record.owner
        )));
    }

    Ok(AuditEntry {
        id,
        owner: record.owner.clone(),
        seq,
        actor: record.actor.clone(),
        action: record.action.clone(),
        target_type: record.target_type.clone(),
        target_id: record.target_id.clone(),
        outcome: record.outcome,
        timestamp,
        payload: record.payload.clone(),
        payload_hash,
        prev_hash,
        entry_hash,
    })
}

const ENTRY_COLUMNS: &str = "id, owner, seq, actor, action, target_type, target_id, outcome,
                             timestamp, payload, payload_hash, prev_hash, entry_hash";

/// Raw row as stored; `payload` stays as text so hashes can be recomputed exactly.
struct StoredEntry {
    entry: AuditEntry,
    payload_json: String,
    timestamp_raw: String,
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEntry> {
    let outcome_raw: String = row.get(7)?;
    let outcome = AuditOutcome::parse(&outcome_raw)
        .ok_or_else(|| conversion_error(7, format!("bad outcome '{outcome_raw}'")))?;
    let payload_json: String = row.get(9)?;
    let payload: Value = serde_json::from_str(&payload_json)
        .map_err(|e| conversion_error(9, format!("bad payload: {e}")))?;
    let timestamp_raw: String = row.get(8)?;
    let seq: i64 = row.get(2)?;

    Ok(StoredEntry {
        entry: AuditEntry {
            id: col_uuid(row, 0)?,
            owner: row.get(1)?,
            seq: seq as u64,
            actor: row.get(3)?,
            action: row.get(4)?,
            target_type: row.get(5)?,
            target_id: row.get(6)?,
            outcome,
            timestamp: col_ts(row, 8)?,
            payload,
            payload_hash: row.get(10)?,
            prev_hash: row.get(11)?,
            entry_hash: row.get(12)?,
        },
        payload_json,
        timestamp_raw,
    })
}

/// Entries for one owner, ordered by timestamp then seq. Bounds are inclusive.
pub fn query(
    conn: &Connection,
    owner: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<AuditEntry>> {
    let from = from.map(ts).unwrap_or_default();
    let to = to.map(ts).unwrap_or_else(|| "9999".to_string());

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_log
             WHERE owner = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC, seq ASC"
        ))
        .map_err(sql_err)?;

    let rows = stmt
        .query_map(params![owner, from, to], row_to_stored)
        .map_err(sql_err)?;

    rows.map(|r| r.map(|s| s.entry).map_err(sql_err)).collect()
}

/// Entries for one owner and target, in chain order.
pub fn for_target(conn: &Connection, owner: &str, target_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_log
             WHERE owner = ?1 AND target_id = ?2 ORDER BY seq ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![owner, target_id], row_to_stored)
        .map_err(sql_err)?;
    rows.map(|r| r.map(|s| s.entry).map_err(sql_err)).collect()
}

/// Every owner that has a chain.
pub fn owners(conn: &Connection) -> Result<Vec<Owner>> {
    let mut stmt = conn
        .prepare("SELECT owner FROM audit_heads ORDER BY owner")
        .map_err(sql_err)?;
    let rows = stmt.query_map([], |row| row.get(0)).map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// Walk the owner's chain in seq order, recomputing every hash and link.
pub fn verify_chain(conn: &Connection, owner: &str) -> Result<ChainReport> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_log WHERE owner = ?1 ORDER BY seq ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt.query_map(params![owner], row_to_stored).map_err(sql_err)?;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut entries = 0u64;
    let mut last_ts: Option<DateTime<Utc>> = None;

    for row in rows {
        let stored = row.map_err(sql_err)?;
        let entry = &stored.entry;
        entries += 1;

        let problem = if entry.seq != entries {
            Some(format!("expected seq {entries}, found {}", entry.seq))
        } else if entry.prev_hash != expected_prev {
            Some("prevHash does not link to the previous entry".to_string())
        } else if payload_hash(&stored.payload_json) != entry.payload_hash {
            Some("payload does not match payloadHash".to_string())
        } else if entry_hash(
            &entry.prev_hash,
            entry.seq,
            &entry.owner,
            &entry.actor,
            &entry.action,
            &entry.target_type,
            &entry.target_id,
            &stored.timestamp_raw,
            entry.outcome.as_str(),
            &entry.payload_hash,
        ) != entry.entry_hash
        {
            Some("entryHash does not match entry contents".to_string())
        } else if last_ts.is_some_and(|t| entry.timestamp < t) {
            Some("timestamp goes backwards".to_string())
        } else {
            None
        };

        if let Some(problem) = problem {
            warn!(owner, seq = entry.seq, %problem, "audit chain broken");
            return Ok(ChainReport {
                owner: owner.to_string(),
                entries,
                valid: false,
                broken_at: Some(entry.seq),
                problem: Some(problem),
            });
        }

        expected_prev = entry.entry_hash.clone();
        last_ts = Some(entry.timestamp);
    }

    // The head must point at the last entry, or rows were removed from the tail
    let head: Option<(String, i64)> = conn
        .query_row(
            "SELECT head_hash, seq FROM audit_heads WHERE owner = ?1",
            params![owner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sql_err)?;
    let head_problem = match head {
        Some((hash, seq)) if hash != expected_prev || seq as u64 != entries => {
            Some(format!("head points at seq {seq}, chain has {entries} entries"))
        }
        None if entries > 0 => Some("chain has entries but no head".to_string()),
        _ => None,
    };

    Ok(ChainReport {
        owner: owner.to_string(),
        entries,
        valid: head_problem.is_none(),
        broken_at: head_problem.as_ref().map(|_| entries),
        problem: head_problem,
    })
}
