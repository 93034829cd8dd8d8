use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use pacetrace_types::TokenTotals;

use crate::schema::{ContentBlock, TranscriptLine};

/// A single text or tool-use block lifted out of an assistant message.
#[derive(Debug, Clone)]
pub struct ContentBlockInfo {
    /// 1-based transcript line the block came from (for state tracking).
    pub line_number: usize,
    /// Index within the message's content array.
    pub position: usize,
    pub timestamp: String,
    pub message_uuid: String,
    pub payload: BlockPayload,
}

#[derive(Debug, Clone)]
pub enum BlockPayload {
    Text {
        text: String,
    },
    ToolUse {
        tool_name: String,
        tool_id: String,
        tool_input: Value,
    },
}

/// Result of one incremental parse pass.
#[derive(Debug, Clone, Default)]
pub struct IncrementalData {
    pub lines_parsed: usize,
    /// Total line count after the pass; the next pass starts here.
    pub last_line: usize,
    pub tokens: TokenTotals,
    pub tool_calls: Vec<String>,
}

/// Extract text and tool-use blocks from assistant messages past `start_line`.
///
/// Lines `<= start_line` are skipped; malformed lines are skipped silently.
pub fn extract_content_blocks(path: &Path, start_line: usize) -> Result<Vec<ContentBlockInfo>> {
    let mut blocks = Vec::new();

    for (line_number, raw) in numbered_lines(path)? {
        if line_number <= start_line {
            continue;
        }
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if !line.is_assistant() {
            continue;
        }

        let timestamp = line.timestamp.clone().unwrap_or_default();
        let message_uuid = line.uuid.clone().unwrap_or_default();
        let Some(message) = line.message else {
            continue;
        };

        for (position, block) in message.content.iter().enumerate() {
            let payload = match block {
                ContentBlock::Text { text } => BlockPayload::Text { text: text.clone() },
                ContentBlock::ToolUse { id, name, input } => BlockPayload::ToolUse {
                    tool_name: name.clone(),
                    tool_id: id.clone(),
                    tool_input: input.clone(),
                },
                _ => continue,
            };

            blocks.push(ContentBlockInfo {
                line_number,
                position,
                timestamp: timestamp.clone(),
                message_uuid: message_uuid.clone(),
                payload,
            });
        }
    }

    Ok(blocks)
}

/// Accumulate token usage and tool-call names over lines past `start_line`.
pub fn parse_incremental_lines(path: &Path, start_line: usize) -> Result<IncrementalData> {
    let mut data = IncrementalData::default();

    for (line_number, raw) in numbered_lines(path)? {
        data.last_line = line_number;
        if line_number <= start_line {
            continue;
        }
        data.lines_parsed += 1;

        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        let Some(message) = line.message else {
            continue;
        };

        if let Some(usage) = &message.usage {
            data.tokens.add(&usage.totals());
        }

        for block in &message.content {
            if let ContentBlock::ToolUse { name, .. } = block
                && !name.is_empty()
            {
                data.tool_calls.push(name.clone());
            }
        }
    }

    Ok(data)
}

pub(crate) fn numbered_lines(
    path: &Path,
) -> Result<impl Iterator<Item = (usize, String)> + use<>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open transcript: {}", path.display()))?;

    Ok(BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .enumerate()
        .map(|(idx, line)| (idx + 1, line)))
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

    const ASSISTANT_WITH_TOOL: &str = r#"{"type":"assistant","uuid":"u-2","timestamp":"2026-01-01T00:00:01Z","message":{"role":"assistant","content":[{"type":"text","text":"Let me check."},{"type":"tool_use","id":"toolu_1","name":"Read","input":{"file_path":"/tmp/a"}}],"usage":{"input_tokens":100,"output_tokens":40,"cache_read_input_tokens":8}}}"#;

    #[test]
    fn test_extract_blocks_skips_up_to_start_line() {
        let file = write_transcript(&[
            r#"{"type":"user","message":{"role":"user","content":"hi"}}"#,
            ASSISTANT_WITH_TOOL,
        ]);

        let all = extract_content_blocks(file.path(), 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].line_number, 2);
        assert_eq!(all[0].position, 0);
        assert!(matches!(&all[0].payload, BlockPayload::Text { text } if text == "Let me check."));
        assert!(matches!(
            &all[1].payload,
            BlockPayload::ToolUse { tool_name, .. } if tool_name == "Read"
        ));

        let none = extract_content_blocks(file.path(), 2).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_extract_blocks_skips_malformed_lines() {
        let file = write_transcript(&["{not json", ASSISTANT_WITH_TOOL, "also not json"]);
        let blocks = extract_content_blocks(file.path(), 0).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].line_number, 2);
    }

    #[test]
    fn test_incremental_tokens_and_tool_calls() {
        let file = write_transcript(&[
            ASSISTANT_WITH_TOOL,
            ASSISTANT_WITH_TOOL,
            r#"{"type":"user","message":{"role":"user","content":"ok"}}"#,
        ]);

        let data = parse_incremental_lines(file.path(), 1).unwrap();
        assert_eq!(data.lines_parsed, 2);
        assert_eq!(data.last_line, 3);
        assert_eq!(data.tokens.input_tokens, 100);
        assert_eq!(data.tokens.output_tokens, 40);
        assert_eq!(data.tokens.cache_read_tokens, 8);
        assert_eq!(data.tool_calls, vec!["Read"]);
    }

    #[test]
    fn test_incremental_on_missing_file_is_an_error() {
        let result = parse_incremental_lines(Path::new("/nonexistent/transcript.jsonl"), 0);
        assert!(result.is_err());
    }
}
