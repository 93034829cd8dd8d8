use serde_json::{Value, json};

use pacetrace_types::SpanBody;

use crate::filter::{MAX_TOOL_OUTPUT_BYTES, filter_tool_result};
use crate::trace::short_id;

/// Span for one assistant text block between tool calls.
///
/// The line number keeps ids unique when the same text appears twice and
/// makes a span traceable back to its transcript position.
pub fn create_text_span(trace_id: &str, text: &str, timestamp: &str, line_number: usize) -> SpanBody {
    SpanBody {
        id: format!("{}-text-{}-{}", trace_id, line_number, short_id()),
        trace_id: trace_id.to_string(),
        name: "Assistant Response".to_string(),
        start_time: timestamp.to_string(),
        end_time: timestamp.to_string(),
        input: None,
        output: Some(text.to_string()),
        metadata: Some(json!({"type": "text"})),
    }
}

/// Span for a tool invocation parsed out of the transcript.
pub fn create_tool_span(
    trace_id: &str,
    tool_name: &str,
    tool_input: Value,
    tool_output: &str,
    timestamp: &str,
) -> SpanBody {
    SpanBody {
        id: format!("{}-span-{}-{}", trace_id, tool_name.to_lowercase(), short_id()),
        trace_id: trace_id.to_string(),
        name: format!("Tool - {}", tool_name),
        start_time: timestamp.to_string(),
        end_time: timestamp.to_string(),
        input: Some(tool_input),
        output: Some(filter_tool_result(tool_output, MAX_TOOL_OUTPUT_BYTES, true)),
        metadata: Some(json!({"tool": tool_name})),
    }
}

/// Span for the tool the hook just observed, built from hook data directly.
///
/// The hook fires before the output reaches the transcript, so this is the
/// only way to capture the response of the current tool.
pub fn create_hook_tool_span(
    trace_id: &str,
    tool_name: Option<&str>,
    tool_input: Option<Value>,
    tool_response: &str,
    timestamp: &str,
) -> SpanBody {
    let name = match tool_name {
        Some(tool) => format!("Tool - {}", tool),
        None => "Tool Execution".to_string(),
    };

    SpanBody {
        id: format!("{}-tool-current-{}", trace_id, short_id()),
        trace_id: trace_id.to_string(),
        name,
        start_time: timestamp.to_string(),
        end_time: timestamp.to_string(),
        input: tool_input,
        output: Some(filter_tool_result(tool_response, MAX_TOOL_OUTPUT_BYTES, true)),
        metadata: Some(json!({
            "source": "post_tool_use_hook",
            "tool": tool_name,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_span_shape() {
        let span = create_text_span("t-1", "hello there", "2026-01-01T00:00:00Z", 12);
        assert!(span.id.starts_with("t-1-text-12-"));
        assert_eq!(span.name, "Assistant Response");
        assert_eq!(span.output.as_deref(), Some("hello there"));
        assert_eq!(span.metadata.unwrap()["type"], "text");
    }

    #[test]
    fn test_tool_span_filters_output() {
        let span = create_tool_span(
            "t-1",
            "Bash",
            json!({"command": "env"}),
            "API_KEY=sk-abcdefghij0123456789xyz",
            "2026-01-01T00:00:00Z",
        );
        assert!(span.id.starts_with("t-1-span-bash-"));
        assert_eq!(span.name, "Tool - Bash");
        let output = span.output.unwrap();
        assert!(!output.contains("sk-abcdefghij"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_tool_span_truncates_large_output() {
        let big = "y".repeat(50_000);
        let span = create_tool_span("t-1", "Read", json!({}), &big, "2026-01-01T00:00:00Z");
        let output = span.output.unwrap();
        assert!(output.len() < 11_000);
        assert!(output.contains("[TRUNCATED - original size: 50000 bytes]"));
    }

    #[test]
    fn test_hook_tool_span_without_name() {
        let span = create_hook_tool_span("t-1", None, None, "result", "2026-01-01T00:00:00Z");
        assert_eq!(span.name, "Tool Execution");
        assert!(span.id.starts_with("t-1-tool-current-"));
        assert_eq!(span.metadata.unwrap()["source"], "post_tool_use_hook");
    }

    #[test]
    fn test_span_ids_are_unique() {
        let a = create_text_span("t-1", "x", "2026-01-01T00:00:00Z", 1);
        let b = create_text_span("t-1", "x", "2026-01-01T00:00:00Z", 1);
        assert_ne!(a.id, b.id);
    }
}
