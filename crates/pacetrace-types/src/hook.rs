use serde::Deserialize;
use serde_json::Value;

/// Event payload the host writes to a hook's stdin.
///
/// Fields vary by lifecycle event; everything is optional and unknown keys
/// are ignored so a newer host never breaks an older sidecar.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Session-start only: startup | resume | clear | compact.
    #[serde(default)]
    pub source: Option<String>,
    /// User-prompt-submit only.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_transcript_path: Option<String>,
    #[serde(default)]
    pub last_assistant_message: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl HookEvent {
    /// Parse the stdin payload; malformed input yields an empty event so the
    /// hook degrades instead of aborting.
    pub fn from_json(raw: &str) -> HookEvent {
        serde_json::from_str(raw).unwrap_or_default()
    }

    /// Tool response as text, flattening `{type: "text"}` arrays the way the
    /// host sometimes delivers them.
    pub fn tool_response_text(&self) -> Option<String> {
        flatten_text(self.tool_response.as_ref()?)
    }
}

fn flatten_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let mut parts = Vec::new();
            for item in items {
                match item {
                    Value::Object(map) => {
                        if let Some(Value::String(text)) = map.get("text") {
                            parts.push(text.clone());
                        } else {
                            parts.push(item.to_string());
                        }
                    }
                    Value::String(s) => parts.push(s.clone()),
                    other => parts.push(other.to_string()),
                }
            }
            if parts.is_empty() { None } else { Some(parts.concat()) }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
