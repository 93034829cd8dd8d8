use serde::Deserialize;
use serde_json::Value;

use pacetrace_types::TokenTotals;

/// One line of the transcript JSONL file.
///
/// The host's format evolves; every field is optional and unknown content
/// block types collapse to [`ContentBlock::Unknown`] instead of failing the
/// whole line.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptLine {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(rename = "compactMetadata", default)]
    pub compact_metadata: Option<CompactMetadata>,
    #[serde(default)]
    pub message: Option<TranscriptMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompactMetadata {
    #[serde(rename = "preTokens", default)]
    pub pre_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "string_or_blocks")]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<UsageBlock>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default, rename = "agentId")]
        agent_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageBlock {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl UsageBlock {
    pub fn totals(&self) -> TokenTotals {
        TokenTotals {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_input_tokens,
            cache_creation_tokens: self.cache_creation_input_tokens,
        }
    }
}

impl TranscriptLine {
    pub fn parse(raw: &str) -> Option<TranscriptLine> {
        serde_json::from_str(raw).ok()
    }

    /// True for assistant-authored entries (both the line tag and the
    /// message role must agree).
    pub fn is_assistant(&self) -> bool {
        self.kind.as_deref() == Some("assistant")
            && self
                .message
                .as_ref()
                .is_some_and(|m| m.role.as_deref() == Some("assistant"))
    }

    pub fn is_user(&self) -> bool {
        self.kind.as_deref() == Some("user")
    }

    /// All text blocks of the message joined with newlines; `None` when the
    /// entry carries no text (thinking / tool-use only).
    pub fn assistant_text(&self) -> Option<String> {
        let message = self.message.as_ref()?;
        if message.role.as_deref() != Some("assistant") {
            return None;
        }

        let parts: Vec<&str> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// The host serializes user content either as a bare string or as an array
/// of blocks; normalize both to the block form.
fn string_or_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrArray {
        String(String),
        Array(Vec<ContentBlock>),
    }

    match StringOrArray::deserialize(deserializer)? {
        StringOrArray::String(s) => Ok(vec![ContentBlock::Text { text: s }]),
        StringOrArray::Array(blocks) => Ok(blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_line_with_blocks() {
        let raw = r#"{
            "type": "assistant",
            "uuid": "u-1",
            "timestamp": "2026-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "model": "sidecar-test-model",
                "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "/tmp/x"}},
                    {"type": "thinking", "thinking": "..."}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 2}
            }
        }"#;

        let line = TranscriptLine::parse(raw).unwrap();
        assert!(line.is_assistant());
        assert_eq!(line.assistant_text().as_deref(), Some("hello"));

        let message = line.message.unwrap();
        assert_eq!(message.content.len(), 3);
        assert!(matches!(message.content[2], ContentBlock::Unknown));
        assert_eq!(message.usage.unwrap().totals().cache_read_tokens, 2);
    }

    #[test]
    fn test_string_content_normalized_to_text_block() {
        let raw = r#"{"type": "user", "message": {"role": "user", "content": "plain prompt"}}"#;
        let line = TranscriptLine::parse(raw).unwrap();
        let message = line.message.unwrap();
        assert!(matches!(
            &message.content[0],
            ContentBlock::Text { text } if text == "plain prompt"
        ));
    }

    #[test]
    fn test_tool_result_agent_id() {
        let raw = r#"{
            "type": "user",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_9", "content": "done", "agentId": "a1b2"}
            ]}
        }"#;
        let line = TranscriptLine::parse(raw).unwrap();
        match &line.message.unwrap().content[0] {
            ContentBlock::ToolResult { agent_id, .. } => {
                assert_eq!(agent_id.as_deref(), Some("a1b2"))
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn test_compact_boundary_entry() {
        let raw = r#"{"type": "system", "subtype": "compact_boundary", "compactMetadata": {"preTokens": 185279}}"#;
        let line = TranscriptLine::parse(raw).unwrap();
        assert_eq!(line.subtype.as_deref(), Some("compact_boundary"));
        assert_eq!(line.compact_metadata.unwrap().pre_tokens, 185_279);
    }

    #[test]
    fn test_malformed_line_returns_none() {
        assert!(TranscriptLine::parse("{truncated").is_none());
    }
}
