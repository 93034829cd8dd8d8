// Assembly of outbound observations.
// Traces, spans and generations are built here; secret masking is a separate
// whole-batch layer that runs after assembly.

mod context;
mod filter;
mod intel;
mod span;
mod trace;

pub use context::ProjectContext;
pub use filter::{filter_tool_result, redact_secrets, truncate_output};
pub use intel::{IntelFields, parse_intel_line, strip_intel_lines};
pub use span::{create_hook_tool_span, create_text_span, create_tool_span};
pub use trace::{
    create_generation, create_subagent_trace, create_trace_for_turn, finalize_subagent_trace,
    finalize_trace, intel_trace_update, new_turn_trace_id, short_id, subagent_trace_id,
};
