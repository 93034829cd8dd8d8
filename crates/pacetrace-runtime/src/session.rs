use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hook_state::write_atomic;

/// Per-turn bookkeeping carried inside the session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceMeta {
    pub current_trace_id: Option<String>,
    pub trace_start_line: usize,
    pub is_first_trace_in_session: bool,
    pub tool_calls: Vec<String>,
    pub tool_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

/// One JSON file per session under the export-state dir.
///
/// Invariant: when `pending_trace` is present it has not been sent yet, and
/// it is cleared unconditionally once a push attempt completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_id: String,
    pub trace_id: String,
    pub last_pushed_line: usize,
    pub metadata: TraceMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_trace: Option<Vec<Value>>,
    pub subagent_traces: BTreeMap<String, Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            trace_id: String::new(),
            last_pushed_line: 0,
            metadata: TraceMeta::default(),
            pending_trace: None,
            subagent_traces: BTreeMap::new(),
        }
    }
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..Default::default()
        }
    }
}

/// Reader/writer for per-session state files with atomic rename writes.
#[derive(Debug, Clone)]
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    pub fn read(&self, session_id: &str) -> Option<SessionState> {
        let raw = std::fs::read_to_string(self.file_for(session_id)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(%err, session_id, "failed to parse session state");
                None
            }
        }
    }

    pub fn write(&self, state: &SessionState) -> anyhow::Result<()> {
        write_atomic(&self.file_for(&state.session_id), state)
    }

    /// Remove state files not touched within `max_age_days`.
    pub fn cleanup_stale(&self, max_age_days: u64) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        let horizon = Duration::from_secs(max_age_days * 86_400);
        let now = SystemTime::now();

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|mtime| now.duration_since(mtime).ok())
                .is_some_and(|age| age > horizon);
            if stale {
                tracing::debug!(file = %path.display(), "removing stale session state");
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(dir: &tempfile::TempDir) -> StateManager {
        StateManager::new(dir.path().to_path_buf())
    }

    #[test]
    fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(manager(&dir).read("absent").is_none());
    }

    #[test]
    fn test_write_read_round_trip_with_pending_trace() {
        let dir = tempfile::tempdir().unwrap();
        let states = manager(&dir);

        let mut state = SessionState::new("s-1");
        state.trace_id = "s-1-turn-abcd1234".to_string();
        state.last_pushed_line = 17;
        state.metadata.current_trace_id = Some("s-1-turn-abcd1234".to_string());
        state.metadata.is_first_trace_in_session = true;
        state.pending_trace = Some(vec![json!({"id": "e-1", "type": "trace-create"})]);
        states.write(&state).unwrap();

        let loaded = states.read("s-1").unwrap();
        assert_eq!(loaded.last_pushed_line, 17);
        assert_eq!(
            loaded.metadata.current_trace_id.as_deref(),
            Some("s-1-turn-abcd1234")
        );
        assert_eq!(loaded.pending_trace.unwrap().len(), 1);
    }

    #[test]
    fn test_cleared_pending_trace_is_absent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let states = manager(&dir);

        let mut state = SessionState::new("s-1");
        state.pending_trace = Some(vec![json!({"id": "e-1"})]);
        states.write(&state).unwrap();

        state.pending_trace = None;
        states.write(&state).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("s-1.json")).unwrap();
        assert!(!raw.contains("pending_trace"));
        assert!(states.read("s-1").unwrap().pending_trace.is_none());
    }

    #[test]
    fn test_corrupt_state_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s-1.json"), "{oops").unwrap();
        assert!(manager(&dir).read("s-1").is_none());
    }

    #[test]
    fn test_cleanup_stale_spares_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let states = manager(&dir);
        states.write(&SessionState::new("s-1")).unwrap();

        states.cleanup_stale(7);
        assert!(states.read("s-1").is_some());

        states.cleanup_stale(0);
        assert!(states.read("s-1").is_none());
    }
}
