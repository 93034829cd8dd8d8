use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Storage Design Rationale
//
// Why one file for snapshots, decisions, blockages and metrics?
// - Every post-tool-use hook touches all of them in one short burst
// - WAL mode lets concurrent hook processes (parent + subagents) interleave
// - The secrets vault stays in its OWN 0600 file; it has a different
//   sensitivity class and is read by every hook
//
// Why append-only rows + time-based cleanup (no updates)?
// - Snapshots and decisions are immutable observations
// - Retention sweeps (60 days / 24 hours) bound file growth without
//   migrations or vacuuming on the hot path

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS usage_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            five_hour_util REAL NOT NULL,
            five_hour_resets_at TEXT,
            seven_day_util REAL NOT NULL,
            seven_day_resets_at TEXT,
            session_id TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON usage_snapshots(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_snapshots_session ON usage_snapshots(session_id);

        CREATE TABLE IF NOT EXISTS pacing_decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            should_throttle INTEGER NOT NULL,
            delay_seconds INTEGER NOT NULL,
            session_id TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_decisions_ts ON pacing_decisions(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_decisions_session ON pacing_decisions(session_id);

        CREATE TABLE IF NOT EXISTS blockages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            category TEXT NOT NULL,
            reason TEXT NOT NULL,
            hook_type TEXT NOT NULL,
            session_id TEXT NOT NULL,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_blockages_ts ON blockages(timestamp DESC);

        CREATE TABLE IF NOT EXISTS usage_metrics (
            bucket_timestamp INTEGER PRIMARY KEY,
            sessions_count INTEGER DEFAULT 0,
            traces_count INTEGER DEFAULT 0,
            spans_count INTEGER DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS secrets_metrics (
            bucket_timestamp INTEGER PRIMARY KEY,
            secrets_masked_count INTEGER DEFAULT 0
        );
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}
