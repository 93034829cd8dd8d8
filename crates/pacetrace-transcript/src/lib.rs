// Incremental parsing over the host's append-only JSONL transcripts.
// Lines are never rewritten, so a per-session line pointer is all the state
// a reader needs; malformed lines are skipped, never fatal.

mod inspect;
mod paths;
mod reader;
pub mod schema;
mod subagent;

pub use inspect::{
    assistant_texts_after, detect_context_exhaustion, detect_silent_tool_stop,
    last_n_assistant_texts, session_model,
};
pub use paths::{find_recent_agent_transcripts, resolve_subagent_transcript, transcript_path_for};
pub use reader::{
    BlockPayload, ContentBlockInfo, IncrementalData, extract_content_blocks,
    parse_incremental_lines,
};
pub use subagent::{extract_subagent_output, extract_task_tool_prompt, extract_task_tool_result};
