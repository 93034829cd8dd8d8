use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::reader::numbered_lines;
use crate::schema::{ContentBlock, TranscriptLine};

/// Find the prompt of a Task tool call in the parent transcript.
///
/// With `parent_observation_id` set, only that tool_use block matches;
/// otherwise the most recent Task prompt wins.
pub fn extract_task_tool_prompt(
    transcript_path: &Path,
    parent_observation_id: Option<&str>,
) -> Option<String> {
    let lines = numbered_lines(transcript_path).ok()?;
    let mut last_prompt = None;

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
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };
            if name != "Task" {
                continue;
            }
            let prompt = input
                .get("prompt")
                .and_then(Value::as_str)
                .map(str::to_string);

            match parent_observation_id {
                Some(wanted) if id == wanted => return prompt,
                Some(_) => {}
                None => {
                    if prompt.is_some() {
                        last_prompt = prompt;
                    }
                }
            }
        }
    }

    last_prompt
}

/// The subagent's final assistant text, read from its own transcript.
///
/// Preferred over the parent's tool-result block: when the stop hook fires
/// the subagent transcript already holds the final message, the parent's
/// result block may not exist yet.
pub fn extract_subagent_output(agent_transcript_path: &Path) -> Option<String> {
    let lines = numbered_lines(agent_transcript_path).ok()?;
    let mut last_text = None;

    for (_, raw) in lines {
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if !line.is_assistant() {
            continue;
        }
        if let Some(text) = concatenated_text(&line) {
            last_text = Some(text);
        }
    }

    last_text
}

/// Task tool result from the parent transcript, optionally filtered to the
/// result block whose content ends with `agentId: <agent_id>`.
///
/// The filter prevents output cross-contamination when several subagents run
/// concurrently and their result blocks interleave.
pub fn extract_task_tool_result(transcript_path: &Path, agent_id: Option<&str>) -> Option<String> {
    let tool_names = build_tool_id_mapping(transcript_path)?;

    let agent_pattern = agent_id
        .and_then(|id| Regex::new(&format!(r"(?m)agentId:\s*{}\s*$", regex::escape(id))).ok());

    let lines = numbered_lines(transcript_path).ok()?;
    let mut last_result = None;
    let mut last_matching = None;

    for (_, raw) in lines {
        let Some(line) = TranscriptLine::parse(&raw) else {
            continue;
        };
        if !line.is_user() {
            continue;
        }
        let Some(message) = line.message else {
            continue;
        };

        for block in &message.content {
            let ContentBlock::ToolResult {
                tool_use_id: Some(tool_use_id),
                content: Some(content),
                ..
            } = block
            else {
                continue;
            };
            if tool_names.get(tool_use_id).map(String::as_str) != Some("Task") {
                continue;
            }
            let Some(text) = normalize_result_content(content) else {
                continue;
            };

            if let Some(pattern) = &agent_pattern
                && pattern.is_match(&text)
            {
                last_matching = Some(text.clone());
            }
            last_result = Some(text);
        }
    }

    if agent_id.is_some() {
        last_matching
    } else {
        last_result
    }
}

fn build_tool_id_mapping(transcript_path: &Path) -> Option<HashMap<String, String>> {
    let lines = numbered_lines(transcript_path).ok()?;
    let mut mapping = HashMap::new();

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
            if let ContentBlock::ToolUse { id, name, .. } = block
                && !id.is_empty()
                && !name.is_empty()
            {
                mapping.insert(id.clone(), name.clone());
            }
        }
    }

    Some(mapping)
}

/// Tool-result content arrives either as a string or as a block array.
fn normalize_result_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => map
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string()),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.concat())
            }
        }
        _ => None,
    }
}

fn concatenated_text(line: &TranscriptLine) -> Option<String> {
    let message = line.message.as_ref()?;
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
        Some(parts.concat())
    }
}
