// Hook-lifecycle runtime: config, state files, logging, and the trace
// orchestrator. The orchestrator itself is stateless across hook processes;
// all continuity lives in the state files written here.

mod config;
mod hook_state;
mod logging;
mod orchestrator;
mod paths;
mod session;
mod validate;

pub use config::{Config, ExportConfig, TempoMode};
pub use hook_state::{HookState, SessionSource, SubagentTraceRef};
pub use logging::{init_logging, sweep_old_logs};
pub use orchestrator::{Orchestrator, ToolInvocation};
pub use paths::Paths;
pub use session::{SessionState, StateManager, TraceMeta};
pub use validate::{ApproveAll, IntentValidator, Verdict, blockage_category_for, is_source_file};
