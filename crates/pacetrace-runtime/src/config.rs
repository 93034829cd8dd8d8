use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pacetrace_pacing::{PacingParams, PacingSettings};

/// When the stop-hook tempo gate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoMode {
    /// Gate only when the user has been idle past the threshold.
    Auto,
    On,
    Off,
}

/// Observability backend credentials and switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub base_url: String,
    pub public_key: String,
    pub secret_key: String,
}

impl ExportConfig {
    /// Enabled AND fully credentialed; anything less silently disables the
    /// export subsystem for the invocation.
    pub fn is_active(&self) -> bool {
        self.enabled
            && !self.base_url.trim().is_empty()
            && !self.public_key.trim().is_empty()
            && !self.secret_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; off means every hook is a no-op.
    pub enabled: bool,

    // Pacing
    pub base_delay: u64,
    pub max_delay: u64,
    pub threshold_percent: f64,
    pub poll_interval: u64,
    pub safety_buffer_pct: f64,
    pub preload_hours: f64,
    pub api_timeout_seconds: u64,
    pub cleanup_interval_hours: u64,
    pub retention_days: u64,
    pub weekly_limit_enabled: bool,
    pub five_hour_limit_enabled: bool,

    // Stop-hook behavior
    pub tempo_mode: TempoMode,
    pub auto_tempo_threshold_minutes: u64,
    pub max_silent_tool_nudges: u32,

    // Pre-tool-use validation
    pub intent_validation_enabled: bool,

    /// Log filter directive (tracing `EnvFilter` syntax).
    pub log_filter: String,

    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: 5,
            max_delay: 350,
            threshold_percent: 0.0,
            poll_interval: 60,
            safety_buffer_pct: 95.0,
            preload_hours: 12.0,
            api_timeout_seconds: 10,
            cleanup_interval_hours: 24,
            retention_days: 60,
            weekly_limit_enabled: true,
            five_hour_limit_enabled: true,
            tempo_mode: TempoMode::Auto,
            auto_tempo_threshold_minutes: 10,
            max_silent_tool_nudges: 3,
            intent_validation_enabled: false,
            log_filter: "warn".to_string(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Load from disk; a missing or unreadable file falls back to defaults
    /// so a hook never aborts over configuration.
    pub fn load_or_default(path: &Path) -> Config {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "failed to load config, using defaults");
                Config::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn pacing_settings(&self) -> PacingSettings {
        PacingSettings {
            poll_interval_secs: self.poll_interval,
            cleanup_interval_hours: self.cleanup_interval_hours,
            retention_days: self.retention_days,
            api_timeout_secs: self.api_timeout_seconds,
            weekly_limit_enabled: self.weekly_limit_enabled,
            five_hour_limit_enabled: self.five_hour_limit_enabled,
            params: PacingParams {
                safety_buffer_pct: self.safety_buffer_pct,
                preload_hours: self.preload_hours,
                base_delay: self.base_delay,
                max_delay: self.max_delay,
                threshold_percent: self.threshold_percent,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.enabled);
        assert_eq!(config.base_delay, 5);
        assert_eq!(config.max_delay, 350);
        assert_eq!(config.poll_interval, 60);
        assert_eq!(config.safety_buffer_pct, 95.0);
        assert_eq!(config.preload_hours, 12.0);
        assert_eq!(config.retention_days, 60);
        assert_eq!(config.tempo_mode, TempoMode::Auto);
        assert!(!config.export.is_active());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.base_delay = 9;
        config.tempo_mode = TempoMode::Off;
        config.export = ExportConfig {
            enabled: true,
            base_url: "https://cloud.example.com".to_string(),
            public_key: "pk-1".to_string(),
            secret_key: "sk-1".to_string(),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.base_delay, 9);
        assert_eq!(loaded.tempo_mode, TempoMode::Off);
        assert!(loaded.export.is_active());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.poll_interval, 60);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_delay = 11\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_delay, 11);
        assert_eq!(config.max_delay, 350);
    }

    #[test]
    fn test_export_requires_all_credentials() {
        let export = ExportConfig {
            enabled: true,
            base_url: "https://cloud.example.com".to_string(),
            public_key: "pk".to_string(),
            secret_key: "".to_string(),
        };
        assert!(!export.is_active());
    }

    #[test]
    fn test_malformed_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config.base_delay, 5);
    }
}
