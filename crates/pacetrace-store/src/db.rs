use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use pacetrace_types::{BlockageCategory, BlockageRecord, PacingDecisionRecord, UsageSnapshot};

use crate::schema::init_schema;
use crate::{Error, Result};

/// Busy-wait timeout every connection opens with.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded retry for writes that race another hook process.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Handle on the shared telemetry database.
///
/// Many hook processes open the same file concurrently; WAL mode plus the
/// busy timeout plus [`Store::with_retry`] make that safe.
pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct BlockageCount {
    pub category: String,
    pub count: u64,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        configure(&conn)?;

        let store = Self { conn };
        init_schema(&store.conn)?;
        Ok(store)
    }

    /// Read-only handle for query paths (status display, projections).
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        init_schema(&store.conn)?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a write, retrying on `database is locked` with exponential backoff.
    ///
    /// The busy timeout absorbs short contention; this catches the rare case
    /// where another hook holds the write lock across a poll or sleep.
    pub(crate) fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match op(&self.conn) {
                Ok(value) => return Ok(value),
                Err(err) if is_locked(&err) && attempt + 1 < MAX_WRITE_ATTEMPTS => {
                    let backoff = backoff_for(attempt);
                    tracing::debug!(attempt, ?backoff, "database locked, retrying");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(Error::Database(err)),
            }
        }
    }

    pub fn insert_snapshot(&self, snapshot: &UsageSnapshot) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                r#"
                INSERT INTO usage_snapshots (
                    timestamp,
                    five_hour_util,
                    five_hour_resets_at,
                    seven_day_util,
                    seven_day_resets_at,
                    session_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    snapshot.timestamp,
                    snapshot.five_hour_util,
                    snapshot.five_hour_resets_at,
                    snapshot.seven_day_util,
                    snapshot.seven_day_resets_at,
                    snapshot.session_id,
                ],
            )
            .map(|_| ())
        })
    }

    pub fn latest_snapshot(&self) -> Result<Option<UsageSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                r#"
                SELECT timestamp, five_hour_util, five_hour_resets_at,
                       seven_day_util, seven_day_resets_at, session_id
                FROM usage_snapshots
                ORDER BY timestamp DESC
                LIMIT 1
                "#,
                [],
                row_to_snapshot,
            )
            .optional()?;

        Ok(snapshot)
    }

    pub fn recent_snapshots(&self, minutes: i64) -> Result<Vec<UsageSnapshot>> {
        let cutoff = now_epoch() - minutes * 60;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, five_hour_util, five_hour_resets_at,
                   seven_day_util, seven_day_resets_at, session_id
            FROM usage_snapshots
            WHERE timestamp >= ?1
            ORDER BY timestamp DESC
            "#,
        )?;

        let snapshots = stmt
            .query_map([cutoff], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(snapshots)
    }

    /// Delete snapshots older than the retention horizon. Returns rows removed.
    pub fn cleanup_old_snapshots(&self, retention_days: u64) -> Result<usize> {
        let cutoff = now_epoch() - (retention_days as i64) * 86_400;

        self.with_retry(|conn| {
            conn.execute("DELETE FROM usage_snapshots WHERE timestamp < ?1", [cutoff])
        })
    }

    pub fn insert_decision(&self, decision: &PacingDecisionRecord) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                r#"
                INSERT INTO pacing_decisions (timestamp, should_throttle, delay_seconds, session_id)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    decision.timestamp,
                    decision.should_throttle as i64,
                    decision.delay_seconds as i64,
                    decision.session_id,
                ],
            )
            .map(|_| ())
        })
    }

    pub fn last_decision(&self, session_id: &str) -> Result<Option<PacingDecisionRecord>> {
        let decision = self
            .conn
            .query_row(
                r#"
                SELECT timestamp, should_throttle, delay_seconds, session_id
                FROM pacing_decisions
                WHERE session_id = ?1
                ORDER BY timestamp DESC
                LIMIT 1
                "#,
                [session_id],
                |row| {
                    Ok(PacingDecisionRecord {
                        timestamp: row.get(0)?,
                        should_throttle: row.get::<_, i64>(1)? != 0,
                        delay_seconds: row.get::<_, i64>(2)? as u64,
                        session_id: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(decision)
    }

    pub fn record_blockage(&self, blockage: &BlockageRecord) -> Result<()> {
        let details = blockage.details.as_ref().map(|d| d.to_string());

        self.with_retry(|conn| {
            conn.execute(
                r#"
                INSERT INTO blockages (timestamp, category, reason, hook_type, session_id, details)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    blockage.timestamp,
                    blockage.category.as_str(),
                    blockage.reason,
                    blockage.hook_type,
                    blockage.session_id,
                    details,
                ],
            )
            .map(|_| ())
        })
    }

    /// Per-category blockage counts over the last `hours`.
    pub fn blockage_counts(&self, hours: i64) -> Result<Vec<BlockageCount>> {
        let cutoff = now_epoch() - hours * 3600;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT category, COUNT(*)
            FROM blockages
            WHERE timestamp >= ?1
            GROUP BY category
            ORDER BY COUNT(*) DESC
            "#,
        )?;

        let counts = stmt
            .query_map([cutoff], |row| {
                Ok(BlockageCount {
                    category: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(counts)
    }

    /// Fail-fast guard for category strings arriving from outside the enum.
    pub fn parse_category(raw: &str) -> Result<BlockageCategory> {
        BlockageCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == raw)
            .ok_or_else(|| Error::Invalid(format!("unknown blockage category '{}'", raw)))
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // WAL must be set before any other statement touches the file.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::DatabaseBusy
                || code.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn backoff_for(attempt: u32) -> Duration {
    // ~10ms doubling per attempt, with a small deterministic jitter so two
    // hooks that collided do not collide again on the same schedule.
    let base = 10u64 << attempt.min(6);
    let jitter = u64::from(attempt * 7 % 9);
    Duration::from_millis(base + jitter)
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageSnapshot> {
    Ok(UsageSnapshot {
        timestamp: row.get(0)?,
        five_hour_util: row.get(1)?,
        five_hour_resets_at: row.get(2)?,
        seven_day_util: row.get(3)?,
        seven_day_resets_at: row.get(4)?,
        session_id: row.get(5)?,
    })
}

pub(crate) fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(session: &str, ts: i64) -> UsageSnapshot {
        UsageSnapshot {
            timestamp: ts,
            five_hour_util: 42.0,
            five_hour_resets_at: Some("2026-01-01T12:00:00+00:00".to_string()),
            seven_day_util: 10.0,
            seven_day_resets_at: None,
            session_id: session.to_string(),
        }
    }

    #[test]
    fn test_schema_initialization_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        init_schema(store.conn()).unwrap();
        assert!(store.latest_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_insert_and_fetch_latest_snapshot() {
        let store = Store::open_in_memory().unwrap();
        store.insert_snapshot(&snapshot("s-1", 100)).unwrap();
        store.insert_snapshot(&snapshot("s-1", 200)).unwrap();

        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.timestamp, 200);
        assert_eq!(latest.five_hour_util, 42.0);
        assert!(latest.seven_day_resets_at.is_none());
    }

    #[test]
    fn test_recent_snapshots_filters_by_age() {
        let store = Store::open_in_memory().unwrap();
        let now = now_epoch();
        store.insert_snapshot(&snapshot("s-1", now - 30)).unwrap();
        store.insert_snapshot(&snapshot("s-1", now - 7200)).unwrap();

        let recent = store.recent_snapshots(60).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp, now - 30);
    }

    #[test]
    fn test_cleanup_removes_only_expired_snapshots() {
        let store = Store::open_in_memory().unwrap();
        let now = now_epoch();
        store.insert_snapshot(&snapshot("s-1", now - 100)).unwrap();
        store
            .insert_snapshot(&snapshot("s-1", now - 61 * 86_400))
            .unwrap();

        let deleted = store.cleanup_old_snapshots(60).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.recent_snapshots(62 * 24 * 60).unwrap().len(), 1);
    }

    #[test]
    fn test_decision_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_decision(&PacingDecisionRecord {
                timestamp: 1000,
                should_throttle: true,
                delay_seconds: 40,
                session_id: "s-1".to_string(),
            })
            .unwrap();
        store
            .insert_decision(&PacingDecisionRecord {
                timestamp: 2000,
                should_throttle: false,
                delay_seconds: 0,
                session_id: "s-1".to_string(),
            })
            .unwrap();

        let last = store.last_decision("s-1").unwrap().unwrap();
        assert_eq!(last.timestamp, 2000);
        assert!(!last.should_throttle);
        assert!(store.last_decision("other").unwrap().is_none());
    }

    #[test]
    fn test_blockage_counts_group_by_category() {
        let store = Store::open_in_memory().unwrap();
        let now = now_epoch();
        for _ in 0..3 {
            store
                .record_blockage(&BlockageRecord {
                    timestamp: now,
                    category: BlockageCategory::PacingQuota,
                    reason: "throttled".to_string(),
                    hook_type: "post_tool_use".to_string(),
                    session_id: "s-1".to_string(),
                    details: Some(serde_json::json!({"delay_seconds": 40})),
                })
                .unwrap();
        }
        store
            .record_blockage(&BlockageRecord {
                timestamp: now,
                category: BlockageCategory::PacingTempo,
                reason: "incomplete".to_string(),
                hook_type: "stop".to_string(),
                session_id: "s-1".to_string(),
                details: None,
            })
            .unwrap();

        let counts = store.blockage_counts(1).unwrap();
        assert_eq!(counts[0].category, "pacing_quota");
        assert_eq!(counts[0].count, 3);
        assert_eq!(counts[1].category, "pacing_tempo");
    }

    #[test]
    fn test_parse_category_rejects_unknown() {
        assert!(Store::parse_category("pacing_quota").is_ok());
        assert!(Store::parse_category("nonsense").is_err());
    }

    #[test]
    fn test_concurrent_opens_share_wal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");

        let first = Store::open(&path).unwrap();
        let second = Store::open(&path).unwrap();

        first.insert_snapshot(&snapshot("s-1", 100)).unwrap();
        let seen = second.latest_snapshot().unwrap().unwrap();
        assert_eq!(seen.timestamp, 100);
    }
}
