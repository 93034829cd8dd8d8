use pacetrace_types::MetricKind;

use crate::db::{Store, now_epoch};
use crate::{Error, Result};

/// 15 minutes, in seconds.
const BUCKET_SECONDS: i64 = 900;

/// Buckets older than this are swept after every increment.
const RETENTION_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics24h {
    pub sessions: u64,
    pub traces: u64,
    pub spans: u64,
    pub total: u64,
}

/// Align a unix timestamp down to its 15-minute bucket boundary.
pub fn align_to_bucket(timestamp: i64) -> i64 {
    timestamp.div_euclid(BUCKET_SECONDS) * BUCKET_SECONDS
}

/// Increment a counter in the current bucket, then sweep stale buckets.
pub fn increment_metric(store: &Store, metric: MetricKind) -> Result<()> {
    let bucket = align_to_bucket(now_epoch());
    let column = metric.column();

    // Column name comes from a closed enum, not caller input.
    let sql = format!(
        "INSERT INTO usage_metrics (bucket_timestamp, {column}) VALUES (?1, 1) \
         ON CONFLICT(bucket_timestamp) DO UPDATE SET {column} = {column} + 1"
    );

    store.with_retry(|conn| conn.execute(&sql, [bucket]).map(|_| ()))?;
    cleanup_stale_buckets(store)
}

/// Same bucketing for the masking counter, which increments by a batch count.
pub fn increment_secrets_masked(store: &Store, count: u64) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    let bucket = align_to_bucket(now_epoch());

    store.with_retry(|conn| {
        conn.execute(
            r#"
            INSERT INTO secrets_metrics (bucket_timestamp, secrets_masked_count)
            VALUES (?1, ?2)
            ON CONFLICT(bucket_timestamp) DO UPDATE SET
                secrets_masked_count = secrets_masked_count + ?2
            "#,
            rusqlite::params![bucket, count as i64],
        )
        .map(|_| ())
    })?;
    cleanup_stale_buckets(store)
}

fn cleanup_stale_buckets(store: &Store) -> Result<()> {
    let cutoff = now_epoch() - RETENTION_SECONDS;

    store.with_retry(|conn| {
        conn.execute(
            "DELETE FROM usage_metrics WHERE bucket_timestamp < ?1",
            [cutoff],
        )?;
        conn.execute(
            "DELETE FROM secrets_metrics WHERE bucket_timestamp < ?1",
            [cutoff],
        )
        .map(|_| ())
    })
}

pub fn metrics_24h(store: &Store) -> Result<Metrics24h> {
    let cutoff = now_epoch() - RETENTION_SECONDS;

    let (sessions, traces, spans) = store.conn().query_row(
        r#"
        SELECT COALESCE(SUM(sessions_count), 0),
               COALESCE(SUM(traces_count), 0),
               COALESCE(SUM(spans_count), 0)
        FROM usage_metrics
        WHERE bucket_timestamp >= ?1
        "#,
        [cutoff],
        |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, i64>(2)? as u64,
            ))
        },
    )?;

    Ok(Metrics24h {
        sessions,
        traces,
        spans,
        total: sessions + traces + spans,
    })
}

pub fn secrets_masked_24h(store: &Store) -> Result<u64> {
    let cutoff = now_epoch() - RETENTION_SECONDS;

    let masked: i64 = store.conn().query_row(
        "SELECT COALESCE(SUM(secrets_masked_count), 0) FROM secrets_metrics WHERE bucket_timestamp >= ?1",
        [cutoff],
        |row| row.get(0),
    )?;

    Ok(masked as u64)
}

/// Fail fast on metric names arriving as strings (CLI surface).
pub fn parse_metric(raw: &str) -> Result<MetricKind> {
    match raw {
        "sessions" => Ok(MetricKind::Sessions),
        "traces" => Ok(MetricKind::Traces),
        "spans" => Ok(MetricKind::Spans),
        other => Err(Error::Invalid(format!("unknown metric '{}'", other))),
    }
}
