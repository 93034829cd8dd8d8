// Credit-aware adaptive throttling.
// A post-tool-use hook polls the usage API on an interval, stores snapshots,
// and projects whether the session is ahead of its quota pace; the decision
// is a bounded delay, never a hard block.

mod api;
mod engine;
mod runner;

pub use api::{
    UsageReading, clear_email_cache, fetch_usage, fetch_user_profile, load_access_token,
    parse_usage_response, user_email,
};
pub use engine::{
    MAX_DELAY_SECONDS, PacingDecision, PacingParams, WindowInput, WindowKind, WindowProjection,
    decide, delay_for,
};
pub use runner::{PacingRun, PacingSettings, run_pacing_check};
