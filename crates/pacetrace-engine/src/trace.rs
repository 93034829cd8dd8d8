use std::path::Path;

use serde_json::{Map, Value};

use pacetrace_transcript::{assistant_texts_after, parse_incremental_lines};
use pacetrace_types::{GenerationBody, GenerationUsage, TokenTotals, TraceBody};

use crate::context::ProjectContext;
use crate::intel::{IntelFields, strip_intel_lines};

/// Trace names are capped so long prompts don't clutter the backend UI.
const MAX_NAME_LENGTH: usize = 100;
const NAME_PREFIX: &str = "User prompt: ";

/// Eight hex chars of a fresh v4 uuid, the id suffix used everywhere.
pub fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Mint the trace id for a new user turn.
pub fn new_turn_trace_id(session_id: &str) -> String {
    format!("{}-turn-{}", session_id, short_id())
}

/// Mint the trace id for a subagent, flat under the parent session.
pub fn subagent_trace_id(parent_session_id: &str, subagent_name: &str) -> String {
    format!("{}-subagent-{}-{}", parent_session_id, subagent_name, short_id())
}

/// Build the trace for a user turn. `input` carries the full user message;
/// the name is a truncated prefix.
pub fn create_trace_for_turn(
    session_id: &str,
    trace_id: &str,
    user_message: &str,
    user_id: Option<&str>,
    project_context: Option<&ProjectContext>,
    model: Option<&str>,
    timestamp: &str,
) -> TraceBody {
    let mut metadata = project_context
        .map(ProjectContext::metadata)
        .unwrap_or_default();
    if let Some(model) = model {
        metadata.insert("model".to_string(), model.into());
    }

    TraceBody {
        id: trace_id.to_string(),
        session_id: Some(session_id.to_string()),
        name: Some(format!("{}{}", NAME_PREFIX, truncate_name(user_message))),
        user_id: Some(user_id.unwrap_or("unknown").to_string()),
        timestamp: Some(timestamp.to_string()),
        input: Some(user_message.to_string()),
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        },
        ..Default::default()
    }
}

/// Finalize a turn: the last non-empty assistant text past the trace's start
/// line (intel line stripped) plus the accumulated token counts.
pub fn finalize_trace(
    trace_id: &str,
    transcript_path: &Path,
    trace_start_line: usize,
    now: &str,
) -> (TraceBody, TokenTotals) {
    // Most assistant entries are thinking or tool-use only; the turn's real
    // output is the last one that carried text.
    let output = assistant_texts_after(transcript_path, trace_start_line)
        .unwrap_or_default()
        .into_iter()
        .filter(|text| !text.is_empty())
        .next_back()
        .map(|text| strip_intel_lines(&text))
        .unwrap_or_default();

    let tokens = parse_incremental_lines(transcript_path, trace_start_line)
        .map(|data| data.tokens)
        .unwrap_or_default();

    let mut metadata = Map::new();
    metadata.insert("input_tokens".to_string(), tokens.input_tokens.into());
    metadata.insert("output_tokens".to_string(), tokens.output_tokens.into());
    metadata.insert("cache_read_tokens".to_string(), tokens.cache_read_tokens.into());
    metadata.insert(
        "cache_creation_tokens".to_string(),
        tokens.cache_creation_tokens.into(),
    );

    let body = TraceBody {
        id: trace_id.to_string(),
        output: Some(output),
        timestamp: Some(now.to_string()),
        end_time: Some(now.to_string()),
        metadata: Some(Value::Object(metadata)),
        ..Default::default()
    };

    (body, tokens)
}

/// Trace for a subagent: sibling of the parent's turn traces, linked by the
/// shared session id, with the Task prompt as input.
pub fn create_subagent_trace(
    trace_id: &str,
    parent_session_id: &str,
    subagent_name: &str,
    subagent_session_id: &str,
    task_prompt: &str,
    now: &str,
) -> TraceBody {
    let mut metadata = Map::new();
    metadata.insert(
        "subagent_session_id".to_string(),
        subagent_session_id.into(),
    );
    metadata.insert("subagent_name".to_string(), subagent_name.into());

    TraceBody {
        id: trace_id.to_string(),
        session_id: Some(parent_session_id.to_string()),
        name: Some(format!("subagent:{}", subagent_name)),
        input: Some(task_prompt.to_string()),
        timestamp: Some(now.to_string()),
        start_time: Some(now.to_string()),
        metadata: Some(Value::Object(metadata)),
        ..Default::default()
    }
}

/// Upsert carrying a subagent's output and explicit end time.
pub fn finalize_subagent_trace(trace_id: &str, output: &str, now: &str) -> TraceBody {
    TraceBody {
        id: trace_id.to_string(),
        output: Some(output.to_string()),
        end_time: Some(now.to_string()),
        ..Default::default()
    }
}

/// Upsert attaching intel metadata to the current trace.
pub fn intel_trace_update(trace_id: &str, intel: &IntelFields) -> TraceBody {
    TraceBody {
        id: trace_id.to_string(),
        metadata: Some(Value::Object(intel.metadata())),
        ..Default::default()
    }
}

/// Generation observation for a finalized turn; `None` when no tokens were
/// consumed (the backend prices cost from generations, zero rows are noise).
pub fn create_generation(
    trace_id: &str,
    model: &str,
    tokens: &TokenTotals,
    now: &str,
) -> Option<GenerationBody> {
    if tokens.is_empty() {
        return None;
    }

    Some(GenerationBody {
        id: format!("{}-gen-{}", trace_id, short_id()),
        trace_id: trace_id.to_string(),
        name: "assistant-generation".to_string(),
        model: model.to_string(),
        usage: GenerationUsage {
            input: tokens.input_tokens,
            output: tokens.output_tokens,
            total: tokens.total(),
            cache_read: (tokens.cache_read_tokens > 0).then_some(tokens.cache_read_tokens),
        },
        start_time: now.to_string(),
    })
}

fn truncate_name(user_message: &str) -> String {
    let max_len = MAX_NAME_LENGTH - NAME_PREFIX.len();
    let chars: Vec<char> = user_message.chars().collect();

    if chars.len() <= max_len {
        return user_message.to_string();
    }

    let mut name: String = chars[..max_len - 3].iter().collect();
    name.push_str("...");
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_transcript(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_turn_trace_shape() {
        let trace = create_trace_for_turn(
            "s-1",
            "s-1-turn-abcd1234",
            "Fix the login bug",
            Some("user@example.com"),
            None,
            Some("test-model"),
            "2026-01-01T00:00:00Z",
        );

        assert_eq!(trace.session_id.as_deref(), Some("s-1"));
        assert_eq!(trace.name.as_deref(), Some("User prompt: Fix the login bug"));
        assert_eq!(trace.input.as_deref(), Some("Fix the login bug"));
        assert_eq!(trace.user_id.as_deref(), Some("user@example.com"));
        assert_eq!(trace.metadata.unwrap()["model"], "test-model");
    }

    #[test]
    fn test_trace_name_capped_at_100_chars() {
        let long_message = "a".repeat(500);
        let trace = create_trace_for_turn(
            "s-1",
            "t-1",
            &long_message,
            None,
            None,
            None,
            "2026-01-01T00:00:00Z",
        );

        let name = trace.name.unwrap();
        assert_eq!(name.chars().count(), 100);
        assert!(name.ends_with("..."));
        // Full message still travels in the input field.
        assert_eq!(trace.input.unwrap().len(), 500);
        assert_eq!(trace.user_id.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_finalize_picks_last_non_empty_text_and_strips_intel() {
        let file = write_transcript(&[
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"working..."}],"usage":{"input_tokens":50,"output_tokens":20}}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{}}],"usage":{"input_tokens":30,"output_tokens":10,"cache_read_input_tokens":4}}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"All done.\n§ △0.1 ■bug"}]}}"#,
        ]);

        let (body, tokens) = finalize_trace("t-1", file.path(), 0, "2026-01-01T00:00:00Z");
        assert_eq!(body.output.as_deref(), Some("All done."));
        assert_eq!(body.end_time.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(tokens.input_tokens, 80);
        assert_eq!(tokens.output_tokens, 30);
        assert_eq!(tokens.cache_read_tokens, 4);

        let metadata = body.metadata.unwrap();
        assert_eq!(metadata["input_tokens"], 80);
        assert_eq!(metadata["cache_read_tokens"], 4);
    }

    #[test]
    fn test_finalize_respects_trace_start_line() {
        let file = write_transcript(&[
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"previous turn"}],"usage":{"input_tokens":999,"output_tokens":999}}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"this turn"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#,
        ]);

        let (body, tokens) = finalize_trace("t-1", file.path(), 1, "2026-01-01T00:00:00Z");
        assert_eq!(body.output.as_deref(), Some("this turn"));
        assert_eq!(tokens.input_tokens, 10);
    }

    #[test]
    fn test_finalize_missing_transcript_yields_empty_output() {
        let (body, tokens) = finalize_trace(
            "t-1",
            Path::new("/nonexistent.jsonl"),
            0,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(body.output.as_deref(), Some(""));
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_subagent_trace_links_to_parent_session() {
        let trace = create_subagent_trace(
            "s-1-subagent-reviewer-aaaa1111",
            "s-1",
            "reviewer",
            "subagent-A1",
            "Review the diff",
            "2026-01-01T00:00:00Z",
        );

        assert_eq!(trace.session_id.as_deref(), Some("s-1"));
        assert_eq!(trace.name.as_deref(), Some("subagent:reviewer"));
        assert_eq!(trace.input.as_deref(), Some("Review the diff"));
        assert!(trace.start_time.is_some());
        assert_eq!(trace.metadata.unwrap()["subagent_session_id"], "subagent-A1");
    }

    #[test]
    fn test_generation_only_when_tokens_present() {
        let now = "2026-01-01T00:00:00Z";
        assert!(create_generation("t-1", "m", &TokenTotals::default(), now).is_none());

        let tokens = TokenTotals {
            input_tokens: 100,
            output_tokens: 50,
            cache_read_tokens: 10,
            cache_creation_tokens: 0,
        };
        let generation = create_generation("t-1", "test-model", &tokens, now).unwrap();
        assert_eq!(generation.usage.total, 150);
        assert_eq!(generation.usage.cache_read, Some(10));
        assert!(generation.id.starts_with("t-1-gen-"));

        let no_cache = TokenTotals {
            input_tokens: 1,
            output_tokens: 1,
            ..Default::default()
        };
        let generation = create_generation("t-1", "m", &no_cache, now).unwrap();
        assert!(generation.usage.cache_read.is_none());
    }

    #[test]
    fn test_trace_ids_carry_session_prefix() {
        let id = new_turn_trace_id("sess");
        assert!(id.starts_with("sess-turn-"));
        assert_eq!(id.len(), "sess-turn-".len() + 8);

        let sub = subagent_trace_id("sess", "explorer");
        assert!(sub.starts_with("sess-subagent-explorer-"));
    }
}
