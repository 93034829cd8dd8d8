use chrono::{DateTime, Duration, Utc};

use pacetrace_store::Store;
use pacetrace_types::{PacingDecisionRecord, UsageSnapshot};

use crate::api;
use crate::engine::{self, PacingDecision, PacingParams, WindowInput};

/// Intervals and flags for the poll/cleanup/decide loop.
#[derive(Debug, Clone, Copy)]
pub struct PacingSettings {
    pub poll_interval_secs: u64,
    pub cleanup_interval_hours: u64,
    pub retention_days: u64,
    pub api_timeout_secs: u64,
    pub weekly_limit_enabled: bool,
    pub five_hour_limit_enabled: bool,
    pub params: PacingParams,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            cleanup_interval_hours: 24,
            retention_days: 60,
            api_timeout_secs: 10,
            weekly_limit_enabled: true,
            five_hour_limit_enabled: true,
            params: PacingParams::default(),
        }
    }
}

/// Outcome of one pacing pass: what happened, and what the hook should sleep.
#[derive(Debug, Clone)]
pub struct PacingRun {
    pub polled: bool,
    pub poll_time: Option<DateTime<Utc>>,
    pub cleanup_time: Option<DateTime<Utc>>,
    pub decision: Option<PacingDecision>,
}

/// One pacing pass inside a post-tool-use hook.
///
/// 1. Poll the usage API when the interval elapsed; store a snapshot.
/// 2. Sweep expired snapshots when the cleanup interval elapsed.
/// 3. Decide from the most recent snapshot (cached between polls) and
///    persist the decision.
///
/// Every failure degrades: a missing token or a dead API just means no new
/// snapshot, and the decision falls back to whatever the store last saw.
pub fn run_pacing_check(
    store: &Store,
    session_id: &str,
    settings: &PacingSettings,
    last_poll_time: Option<DateTime<Utc>>,
    last_cleanup_time: Option<DateTime<Utc>>,
) -> PacingRun {
    let now = Utc::now();
    let mut run = PacingRun {
        polled: false,
        poll_time: None,
        cleanup_time: None,
        decision: None,
    };

    if interval_elapsed(last_poll_time, now, Duration::seconds(settings.poll_interval_secs as i64)) {
        run.polled = true;
        run.poll_time = Some(now);

        if let Some(reading) = poll_usage(settings) {
            let snapshot = UsageSnapshot {
                timestamp: now.timestamp(),
                five_hour_util: reading.five_hour_util,
                five_hour_resets_at: reading.five_hour_resets_at.map(|dt| dt.to_rfc3339()),
                seven_day_util: reading.seven_day_util,
                seven_day_resets_at: reading.seven_day_resets_at.map(|dt| dt.to_rfc3339()),
                session_id: session_id.to_string(),
            };
            if let Err(err) = store.insert_snapshot(&snapshot) {
                tracing::warn!(%err, "failed to store usage snapshot");
            }
        }
    }

    if interval_elapsed(
        last_cleanup_time,
        now,
        Duration::hours(settings.cleanup_interval_hours as i64),
    ) {
        run.cleanup_time = Some(now);
        match store.cleanup_old_snapshots(settings.retention_days) {
            Ok(deleted) if deleted > 0 => {
                tracing::info!(deleted, "expired usage snapshots removed")
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "snapshot cleanup failed"),
        }
    }

    match store.latest_snapshot() {
        Ok(Some(snapshot)) => {
            let decision = decide_from_snapshot(&snapshot, now, settings);

            let record = PacingDecisionRecord {
                timestamp: now.timestamp(),
                should_throttle: decision.should_throttle,
                delay_seconds: decision.delay_seconds,
                session_id: session_id.to_string(),
            };
            if let Err(err) = store.insert_decision(&record) {
                tracing::warn!(%err, "failed to store pacing decision");
            }

            run.decision = Some(decision);
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(%err, "failed to load latest snapshot"),
    }

    run
}

fn poll_usage(settings: &PacingSettings) -> Option<api::UsageReading> {
    let token = api::load_access_token()?;
    api::fetch_usage(&token, settings.api_timeout_secs)
}

fn decide_from_snapshot(
    snapshot: &UsageSnapshot,
    now: DateTime<Utc>,
    settings: &PacingSettings,
) -> PacingDecision {
    let five_hour = WindowInput {
        utilization: snapshot.five_hour_util,
        resets_at: parse_instant(snapshot.five_hour_resets_at.as_deref()),
        enabled: settings.five_hour_limit_enabled,
    };
    let seven_day = WindowInput {
        utilization: snapshot.seven_day_util,
        resets_at: parse_instant(snapshot.seven_day_resets_at.as_deref()),
        enabled: settings.weekly_limit_enabled,
    };

    engine::decide(&five_hour, &seven_day, now, &settings.params)
}

fn parse_instant(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn interval_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        Some(last) => now - last >= interval,
        None => true,
    }
}
