//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to
//! N+1 and is recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
        }

        tx.commit()?;
        tracing::info!(from = current, to = CURRENT_VERSION, "migrated receipt database");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: receipts, tombstones and forwarding annotations.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per receipt, exactly the receipt fields
        CREATE TABLE receipts (
            receipt_cid TEXT PRIMARY KEY,     -- sha256:<hex> identity
            trace_id TEXT NOT NULL,
            seq INTEGER NOT NULL,             -- position in the trace, from 0
            cid TEXT NOT NULL,                -- envelope content CID
            ts TEXT NOT NULL,                 -- RFC 3339, verbatim
            prev_cid TEXT NOT NULL,
            kid TEXT NOT NULL,
            payload_type TEXT NOT NULL,
            target_type TEXT NOT NULL,
            signature TEXT NOT NULL,          -- base64url Ed25519 signature

            UNIQUE(trace_id, seq)
        );

        -- Anchor left behind by pruning, one per trace
        CREATE TABLE tombstones (
            trace_id TEXT PRIMARY KEY,
            last_receipt_cid TEXT NOT NULL,
            next_seq INTEGER NOT NULL,
            pruned_count INTEGER NOT NULL,
            pruned_at TEXT NOT NULL
        );

        -- Append-only forwarding outcomes
        CREATE TABLE forward_annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_cid TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            destination TEXT NOT NULL,
            outcome TEXT NOT NULL,            -- JSON-encoded ForwardOutcome
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX idx_receipts_kid ON receipts(kid);
        CREATE INDEX idx_annotations_receipt ON forward_annotations(receipt_cid);
        "#,
    )?;

    Ok(())
}
