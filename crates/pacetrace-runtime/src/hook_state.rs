use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forward map entry: one running subagent the hook layer knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentTraceRef {
    pub trace_id: String,
    pub parent_transcript_path: String,
}

/// Why a session-start hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// New session: full reset.
    Startup,
    /// Resuming: new session id, counters preserved.
    Resume,
    /// `/clear` or compaction: counters reset, session id kept.
    ClearOrCompact,
}

impl SessionSource {
    pub fn parse(raw: Option<&str>) -> SessionSource {
        match raw {
            Some("resume") => SessionSource::Resume,
            Some("clear") | Some("compact") => SessionSource::ClearOrCompact,
            _ => SessionSource::Startup,
        }
    }
}

/// Process-wide hook state, one JSON file shared by every hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookState {
    pub session_id: String,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub in_subagent: bool,
    pub subagent_counter: u32,
    pub tool_execution_count: u64,
    pub last_user_interaction_time: Option<DateTime<Utc>>,
    pub silent_tool_nudge_count: u32,
    /// Per-session tempo override; absent means "use the configured mode".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo_session_enabled: Option<bool>,
    /// agent_id -> subagent trace bookkeeping (supports concurrent subagents).
    pub subagent_traces: BTreeMap<String, SubagentTraceRef>,
    /// Most recently started subagent, used by post-tool-use context override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_agent_id: Option<String>,
}

impl Default for HookState {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", Utc::now().timestamp()),
            last_poll_time: None,
            last_cleanup_time: None,
            in_subagent: false,
            subagent_counter: 0,
            tool_execution_count: 0,
            last_user_interaction_time: None,
            silent_tool_nudge_count: 0,
            tempo_session_enabled: None,
            subagent_traces: BTreeMap::new(),
            current_agent_id: None,
        }
    }
}

impl HookState {
    /// Load from disk; any failure yields fresh defaults.
    pub fn load(path: &Path) -> HookState {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return HookState::default();
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(%err, "failed to parse hook state, using defaults");
                HookState::default()
            }
        }
    }

    /// Atomic write: temp file then rename, so a concurrent reader observes
    /// either the old or the new complete version.
    pub fn save(&self, path: &Path) {
        if let Err(err) = write_atomic(path, self) {
            tracing::warn!(%err, "failed to save hook state");
        }
    }

    /// Apply session-start reset semantics.
    pub fn reset_for_session(&mut self, source: SessionSource, session_id: Option<&str>) {
        // Cancelled subagents must not leak a stale counter into a new turn.
        self.subagent_counter = 0;
        self.in_subagent = false;

        match source {
            SessionSource::Startup => {
                if let Some(id) = session_id {
                    self.session_id = id.to_string();
                }
                self.last_user_interaction_time = None;
                self.tool_execution_count = 0;
                self.last_poll_time = None;
            }
            SessionSource::Resume => {
                if let Some(id) = session_id {
                    self.session_id = id.to_string();
                }
            }
            SessionSource::ClearOrCompact => {
                self.last_user_interaction_time = None;
                self.tool_execution_count = 0;
                self.last_poll_time = None;
            }
        }
    }

    pub fn enter_subagent(&mut self) {
        self.subagent_counter += 1;
        self.in_subagent = self.subagent_counter > 0;
    }

    /// Counter is reference-counted and bounded at 0 from below.
    pub fn leave_subagent(&mut self) {
        self.subagent_counter = self.subagent_counter.saturating_sub(1);
        self.in_subagent = self.subagent_counter > 0;
    }
}

pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(value)?)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}
