use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;

const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const PROFILE_URL: &str = "https://api.anthropic.com/api/oauth/profile";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const USER_AGENT: &str = concat!("pacetrace/", env!("CARGO_PKG_VERSION"));

// One lookup per process; hooks are short-lived so there is no invalidation.
static CACHED_EMAIL: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Normalized usage API reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageReading {
    pub five_hour_util: f64,
    pub five_hour_resets_at: Option<DateTime<Utc>>,
    pub seven_day_util: f64,
    pub seven_day_resets_at: Option<DateTime<Utc>>,
}

/// Load the OAuth access token from the host's credentials file.
pub fn load_access_token() -> Option<String> {
    let creds_path = credentials_path()?;
    let raw = std::fs::read_to_string(&creds_path).ok()?;
    let data: Value = serde_json::from_str(&raw).ok()?;

    data.get("claudeAiOauth")?
        .get("accessToken")?
        .as_str()
        .map(str::to_string)
}

fn credentials_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".claude").join(".credentials.json"))
}

/// Fetch current quota utilization. Any failure (network, non-200, parse)
/// degrades to `None`; pacing then runs on the cached snapshot.
pub fn fetch_usage(access_token: &str, timeout_secs: u64) -> Option<UsageReading> {
    let response = oauth_get(USAGE_URL, access_token, timeout_secs)?;
    parse_usage_response(&response)
}

/// Parse the usage response, tolerating a missing or null weekly block.
///
/// An account without a weekly window reports utilization 0 and no reset
/// instant, which keeps that window out of constrained-window selection.
pub fn parse_usage_response(data: &Value) -> Option<UsageReading> {
    let five_hour = data.get("five_hour")?;

    let mut reading = UsageReading {
        five_hour_util: five_hour
            .get("utilization")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        five_hour_resets_at: parse_instant(five_hour.get("resets_at")),
        ..Default::default()
    };

    if let Some(seven_day) = data.get("seven_day").filter(|v| !v.is_null()) {
        reading.seven_day_util = seven_day
            .get("utilization")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        reading.seven_day_resets_at = parse_instant(seven_day.get("resets_at"));
    }

    Some(reading)
}

/// Fetch the OAuth profile (3 s budget by default at call sites).
pub fn fetch_user_profile(access_token: &str, timeout_secs: u64) -> Option<Value> {
    oauth_get(PROFILE_URL, access_token, timeout_secs)
}

/// The account email, fetched once per process and cached.
pub fn user_email() -> Option<String> {
    {
        let cached = CACHED_EMAIL.lock().ok()?;
        if cached.is_some() {
            return cached.clone();
        }
    }

    let token = load_access_token()?;
    let profile = fetch_user_profile(&token, 3)?;
    let email = profile
        .get("account")?
        .get("email")?
        .as_str()
        .map(str::to_string)?;

    if let Ok(mut cached) = CACHED_EMAIL.lock() {
        *cached = Some(email.clone());
    }
    Some(email)
}

/// Drop the cached email so the next lookup refetches.
pub fn clear_email_cache() {
    if let Ok(mut cached) = CACHED_EMAIL.lock() {
        *cached = None;
    }
}

fn oauth_get(url: &str, access_token: &str, timeout_secs: u64) -> Option<Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .ok()?;

    let response = client
        .get(url)
        .bearer_auth(access_token)
        .header("anthropic-beta", OAUTH_BETA)
        .header("Content-Type", "application/json")
        .send();

    match response {
        Ok(resp) if resp.status().is_success() => resp.json().ok(),
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), url, "usage API request rejected");
            None
        }
        Err(err) => {
            tracing::warn!(%err, url, "usage API request failed");
            None
        }
    }
}

fn parse_instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_response() {
        let data = json!({
            "five_hour": {"utilization": 75.5, "resets_at": "2026-01-01T12:00:00+00:00"},
            "seven_day": {"utilization": 31.0, "resets_at": "2026-01-04T00:00:00+00:00"},
        });

        let reading = parse_usage_response(&data).unwrap();
        assert_eq!(reading.five_hour_util, 75.5);
        assert!(reading.five_hour_resets_at.is_some());
        assert_eq!(reading.seven_day_util, 31.0);
        assert!(reading.seven_day_resets_at.is_some());
    }

    #[test]
    fn test_null_seven_day_means_no_weekly_window() {
        let data = json!({
            "five_hour": {"utilization": 10.0, "resets_at": null},
            "seven_day": null,
        });

        let reading = parse_usage_response(&data).unwrap();
        assert_eq!(reading.seven_day_util, 0.0);
        assert!(reading.seven_day_resets_at.is_none());
        assert!(reading.five_hour_resets_at.is_none());
    }

    #[test]
    fn test_missing_five_hour_block_fails_parse() {
        assert!(parse_usage_response(&json!({"seven_day": null})).is_none());
    }

    #[test]
    fn test_invalid_reset_instant_ignored() {
        let data = json!({
            "five_hour": {"utilization": 5.0, "resets_at": "not-a-timestamp"},
        });
        let reading = parse_usage_response(&data).unwrap();
        assert!(reading.five_hour_resets_at.is_none());
    }
}
