use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::Result;

use crate::reader::numbered_lines;
use crate::schema::{ContentBlock, TranscriptLine};

/// How much of the transcript tail is scanned for exhaustion markers.
const TAIL_READ_BYTES: u64 = 50_000;

/// Terminal error text the host emits when the context window is gone.
const PROMPT_TOO_LONG: &str = "Prompt is too long";

/// A compact boundary this close to the limit means the next compaction
/// will likely fail; allow graceful exit before the session wedges.
const PRE_TOKENS_DANGER: u64 = 180_000;

/// Last `n` assistant message texts, most recent last.
pub fn last_n_assistant_texts(path: &Path, n: usize) -> Result<Vec<String>> {
    let mut texts = assistant_texts_after(path, 0)?;
    if texts.len() > n {
        texts.drain(..texts.len() - n);
    }
    Ok(texts)
}

/// First model name recorded in the transcript, from assistant metadata.
pub fn session_model(path: &Path) -> Option<String> {
    let lines = numbered_lines(path).ok()?;

    for (_, raw) in lines {
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if let Some(model) = line.message.and_then(|m| m.model)
            && !model.is_empty()
        {
            return Some(model);
        }
    }
    None
}

/// Assistant message texts from lines past `start_line`, in order.
/// Entries without text (thinking / tool-use only) are omitted.
pub fn assistant_texts_after(path: &Path, start_line: usize) -> Result<Vec<String>> {
    let mut texts = Vec::new();

    for (line_number, raw) in numbered_lines(path)? {
        if line_number <= start_line {
            continue;
        }
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if let Some(text) = line.assistant_text() {
            texts.push(text);
        }
    }

    Ok(texts)
}

/// Detect a turn that ended on a tool use with no assistant text after it.
///
/// The stop hook treats this as "stopped mid-turn" and nudges the assistant
/// to continue instead of letting the session stall.
pub fn detect_silent_tool_stop(path: &Path) -> bool {
    #[derive(PartialEq)]
    enum Tail {
        Nothing,
        Text,
        ToolUse,
    }

    let Ok(lines) = numbered_lines(path) else {
        return false;
    };

    let mut tail = Tail::Nothing;
    for (_, raw) in lines {
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if !line.is_assistant() {
            continue;
        }
        let Some(message) = line.message else {
            continue;
        };

        for block in &message.content {
            match block {
                ContentBlock::Text { text } if !text.trim().is_empty() => tail = Tail::Text,
                ContentBlock::ToolUse { .. } => tail = Tail::ToolUse,
                _ => {}
            }
        }
    }

    tail == Tail::ToolUse
}

/// Context-exhaustion heuristics over the transcript tail.
///
/// Either signal allows graceful exit, bypassing blocking validators:
/// - the last entry is an assistant message whose text is exactly
///   "Prompt is too long" (terminal; the assistant cannot respond), or
/// - a recent compact boundary reports `preTokens` in the danger zone.
pub fn detect_context_exhaustion(path: &Path) -> bool {
    let Some(tail) = read_tail(path, TAIL_READ_BYTES) else {
        return false;
    };

    let lines: Vec<&str> = tail
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let Some(last_raw) = lines.last() else {
        return false;
    };

    if let Some(last) = TranscriptLine::parse(last_raw)
        && last
            .assistant_text()
            .is_some_and(|text| text.trim() == PROMPT_TOO_LONG)
    {
        tracing::debug!("terminal context exhaustion: prompt-too-long error");
        return true;
    }

    // Walk the most recent ~20 entries; stop at the first compact boundary.
    for raw in lines.iter().rev().take(20) {
        let Some(line) = TranscriptLine::parse(raw) else {
            continue;
        };
        if line.subtype.as_deref() == Some("compact_boundary") {
            let pre_tokens = line.compact_metadata.map(|m| m.pre_tokens).unwrap_or(0);
            if pre_tokens > PRE_TOKENS_DANGER {
                tracing::debug!(pre_tokens, "context low: compact boundary in danger zone");
                return true;
            }
            break;
        }
    }

    false
}

fn read_tail(path: &Path, max_bytes: u64) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let size = file.seek(SeekFrom::End(0)).ok()?;
    if size == 0 {
        return None;
    }

    let read_size = size.min(max_bytes);
    file.seek(SeekFrom::Start(size - read_size)).ok()?;

    let mut buf = Vec::with_capacity(read_size as usize);
    file.read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
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

    fn assistant_text(text: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"role":"assistant","content":[{{"type":"text","text":"{}"}}]}}}}"#,
            text
        )
    }

    const ASSISTANT_TOOL_ONLY: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{}}]}}"#;

    #[test]
    fn test_last_n_assistant_texts_window() {
        let file = write_transcript(&[
            &assistant_text("one"),
            ASSISTANT_TOOL_ONLY,
            &assistant_text("two"),
            &assistant_text("three"),
        ]);

        let texts = last_n_assistant_texts(file.path(), 2).unwrap();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn test_silent_tool_stop_when_tail_is_tool_use() {
        let file = write_transcript(&[&assistant_text("working on it"), ASSISTANT_TOOL_ONLY]);
        assert!(detect_silent_tool_stop(file.path()));
    }

    #[test]
    fn test_no_silent_stop_when_text_follows_tool() {
        let file = write_transcript(&[ASSISTANT_TOOL_ONLY, &assistant_text("all done")]);
        assert!(!detect_silent_tool_stop(file.path()));
    }

    #[test]
    fn test_no_silent_stop_on_missing_file() {
        assert!(!detect_silent_tool_stop(Path::new("/nonexistent.jsonl")));
    }

    #[test]
    fn test_exhaustion_on_prompt_too_long() {
        let file = write_transcript(&[
            &assistant_text("still fine"),
            &assistant_text("Prompt is too long"),
        ]);
        assert!(detect_context_exhaustion(file.path()));
    }

    #[test]
    fn test_exhaustion_on_high_pre_tokens() {
        let file = write_transcript(&[
            r#"{"type":"system","subtype":"compact_boundary","compactMetadata":{"preTokens":185279}}"#,
            &assistant_text("continuing"),
        ]);
        assert!(detect_context_exhaustion(file.path()));
    }

    #[test]
    fn test_no_exhaustion_on_healthy_boundary() {
        let file = write_transcript(&[
            r#"{"type":"system","subtype":"compact_boundary","compactMetadata":{"preTokens":90000}}"#,
            &assistant_text("continuing"),
        ]);
        assert!(!detect_context_exhaustion(file.path()));
    }

    #[test]
    fn test_no_exhaustion_on_normal_final_text() {
        let file = write_transcript(&[&assistant_text("done, here is the summary")]);
        assert!(!detect_context_exhaustion(file.path()));
    }
}
