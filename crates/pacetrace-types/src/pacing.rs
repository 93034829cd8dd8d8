use serde::{Deserialize, Serialize};

/// One immutable reading of the remote usage quota.
///
/// Reset instants are kept as RFC 3339 strings; a `None` reset means the
/// window is inactive and never constrains pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub timestamp: i64,
    pub five_hour_util: f64,
    pub five_hour_resets_at: Option<String>,
    pub seven_day_util: f64,
    pub seven_day_resets_at: Option<String>,
    pub session_id: String,
}

/// Immutable record of a throttle decision, written every post-tool-use hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingDecisionRecord {
    pub timestamp: i64,
    pub should_throttle: bool,
    pub delay_seconds: u64,
    pub session_id: String,
}

/// Why a hook blocked or throttled the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockageCategory {
    IntentValidation,
    IntentValidationTdd,
    IntentValidationCleancode,
    PacingTempo,
    PacingQuota,
    Other,
}

impl BlockageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockageCategory::IntentValidation => "intent_validation",
            BlockageCategory::IntentValidationTdd => "intent_validation_tdd",
            BlockageCategory::IntentValidationCleancode => "intent_validation_cleancode",
            BlockageCategory::PacingTempo => "pacing_tempo",
            BlockageCategory::PacingQuota => "pacing_quota",
            BlockageCategory::Other => "other",
        }
    }

    pub fn all() -> &'static [BlockageCategory] {
        &[
            BlockageCategory::IntentValidation,
            BlockageCategory::IntentValidationTdd,
            BlockageCategory::IntentValidationCleancode,
            BlockageCategory::PacingTempo,
            BlockageCategory::PacingQuota,
            BlockageCategory::Other,
        ]
    }
}

impl std::fmt::Display for BlockageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blockage telemetry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockageRecord {
    pub timestamp: i64,
    pub category: BlockageCategory,
    pub reason: String,
    pub hook_type: String,
    pub session_id: String,
    pub details: Option<serde_json::Value>,
}

/// Metric counters kept in 15-minute buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Sessions,
    Traces,
    Spans,
}

impl MetricKind {
    pub fn column(&self) -> &'static str {
        match self {
            MetricKind::Sessions => "sessions_count",
            MetricKind::Traces => "traces_count",
            MetricKind::Spans => "spans_count",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Sessions => "sessions",
            MetricKind::Traces => "traces",
            MetricKind::Spans => "spans",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_serde() {
        for category in BlockageCategory::all() {
            let json = serde_json::to_string(category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
            let back: BlockageCategory = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *category);
        }
    }
}
