use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

/// Only agent transcripts touched this recently are candidates when matching
/// a tool_use_id to a running subagent.
const RECENT_AGENT_WINDOW: Duration = Duration::from_secs(30);

/// Derive the transcript path for a session from the working directory.
///
/// The host stores parent transcripts under a cwd-encoded project directory:
/// `~/.claude/projects/<cwd-with-slashes-replaced-by-dashes>/<session>.jsonl`.
/// Returns `None` when the file does not exist.
pub fn transcript_path_for(cwd: &Path, session_id: &str) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let encoded = cwd.to_string_lossy().replace('/', "-");
    let path = home
        .join(".claude")
        .join("projects")
        .join(encoded)
        .join(format!("{session_id}.jsonl"));

    path.exists().then_some(path)
}

/// Recently-modified subagent transcripts near a parent transcript.
///
/// Covers both flat `agent-*.jsonl` siblings and the nested
/// `<session_id>/subagents/agent-*.jsonl` layout.
pub fn find_recent_agent_transcripts(
    parent_transcript: &Path,
    session_id: Option<&str>,
) -> Vec<PathBuf> {
    let Some(project_dir) = parent_transcript.parent() else {
        return Vec::new();
    };

    let mut roots = vec![project_dir.to_path_buf()];
    if let Some(session_id) = session_id {
        roots.push(project_dir.join(session_id).join("subagents"));
    }

    let now = SystemTime::now();
    let mut found = Vec::new();

    for root in roots {
        for entry in WalkDir::new(&root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("agent-") || !name.ends_with(".jsonl") {
                continue;
            }
            let recent = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|mtime| now.duration_since(mtime).ok())
                .is_some_and(|age| age < RECENT_AGENT_WINDOW);
            if recent {
                found.push(path.to_path_buf());
            }
        }
    }

    found
}

/// Resolve the transcript that actually contains `tool_use_id`.
///
/// A pre-tool-use hook in a subagent receives the parent transcript path;
/// scanning recent agent transcripts for the tool id finds the real one.
pub fn resolve_subagent_transcript(
    parent_transcript: &Path,
    session_id: Option<&str>,
    tool_use_id: &str,
) -> Option<PathBuf> {
    if parent_transcript.to_string_lossy().contains("/agent-") {
        return None;
    }

    for candidate in find_recent_agent_transcripts(parent_transcript, session_id) {
        if file_contains(&candidate, tool_use_id) {
            return Some(candidate);
        }
    }
    None
}

fn file_contains(path: &Path, needle: &str) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .any(|line| line.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_find_agent_transcripts_flat_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("session-1.jsonl");
        std::fs::write(&parent, "{}\n").unwrap();
        std::fs::write(dir.path().join("agent-aa.jsonl"), "{}\n").unwrap();
        std::fs::write(dir.path().join("not-an-agent.jsonl"), "{}\n").unwrap();

        let nested = dir.path().join("session-1").join("subagents");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("agent-bb.jsonl"), "{}\n").unwrap();

        let mut names: Vec<String> = find_recent_agent_transcripts(&parent, Some("session-1"))
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["agent-aa.jsonl", "agent-bb.jsonl"]);
    }

    #[test]
    fn test_resolve_subagent_transcript_by_tool_use_id() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("session-1.jsonl");
        std::fs::write(&parent, "{}\n").unwrap();

        let mut agent = std::fs::File::create(dir.path().join("agent-cc.jsonl")).unwrap();
        writeln!(agent, r#"{{"type":"assistant","tool_use_id":"toolu_match"}}"#).unwrap();

        let resolved = resolve_subagent_transcript(&parent, None, "toolu_match").unwrap();
        assert!(resolved.ends_with("agent-cc.jsonl"));

        assert!(resolve_subagent_transcript(&parent, None, "toolu_absent").is_none());
    }
}
