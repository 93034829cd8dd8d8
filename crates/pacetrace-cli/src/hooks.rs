use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use pacetrace_pacing::MAX_DELAY_SECONDS;
use pacetrace_push::BackendClient;
use pacetrace_runtime::{
    ApproveAll, Config, HookState, IntentValidator, Orchestrator, Paths, SessionSource,
    StateManager, SubagentTraceRef, TempoMode, ToolInvocation, blockage_category_for, init_logging,
    is_source_file,
};
use pacetrace_store::Store;
use pacetrace_transcript::{
    detect_context_exhaustion, detect_silent_tool_stop, last_n_assistant_texts,
    resolve_subagent_transcript, transcript_path_for,
};
use pacetrace_types::{BlockageCategory, BlockageRecord, HookEvent};

pub const EXIT_ALLOW: i32 = 0;
pub const EXIT_BLOCK: i32 = 2;

pub struct HookContext {
    pub paths: Paths,
    pub config: Config,
}

impl HookContext {
    pub fn prepare() -> Result<HookContext> {
        let paths = Paths::resolve()?;
        paths.ensure_root()?;
        let config = Config::load_or_default(&paths.config_file());
        init_logging(&paths.log_dir(), &config.log_filter);
        Ok(HookContext { paths, config })
    }

    fn open_store(&self) -> Option<Store> {
        match Store::open(&self.paths.db_file()) {
            Ok(store) => Some(store),
            Err(err) => {
                tracing::warn!(%err, "failed to open telemetry store");
                None
            }
        }
    }

    fn states(&self) -> StateManager {
        StateManager::new(self.paths.export_state_dir())
    }
}

/// Stdout may be closed by the host mid-write; swallow the broken pipe
/// instead of crashing the hook.
fn safe_print(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{}", message);
    let _ = stdout.flush();
}

fn read_stdin() -> String {
    let mut raw = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw);
    raw
}

fn transcript_path(event: &HookEvent) -> Option<PathBuf> {
    if let Some(path) = &event.transcript_path {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let session_id = event.session_id.as_deref()?;
    let cwd = std::env::current_dir().ok()?;
    transcript_path_for(&cwd, session_id)
}

fn record_blockage(
    store: Option<&Store>,
    category: BlockageCategory,
    reason: &str,
    hook_type: &str,
    session_id: &str,
    details: Option<serde_json::Value>,
) {
    let Some(store) = store else { return };
    let blockage = BlockageRecord {
        timestamp: Utc::now().timestamp(),
        category,
        reason: reason.to_string(),
        hook_type: hook_type.to_string(),
        session_id: session_id.to_string(),
        details,
    };
    if let Err(err) = store.record_blockage(&blockage) {
        tracing::warn!(%err, "failed to record blockage");
    }
}

fn with_orchestrator(ctx: &HookContext, f: impl FnOnce(&Orchestrator<'_>)) {
    let Some(store) = ctx.open_store() else { return };
    let export = &ctx.config.export;
    let client = BackendClient::new(&export.base_url, &export.public_key, &export.secret_key);
    let orchestrator = Orchestrator::new(
        &ctx.config,
        &store,
        ctx.paths.secrets_db_file(),
        ctx.states(),
        &client,
    );
    f(&orchestrator);
}

// === session_start ==========================================================

pub fn run_session_start(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        return EXIT_ALLOW;
    }

    let event = HookEvent::from_json(&read_stdin());
    let source = SessionSource::parse(event.source.as_deref());

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);
    state.reset_for_session(source, event.session_id.as_deref());
    state.save(&state_path);

    // Stale per-session export state (>7 days) accumulates forever otherwise.
    ctx.states().cleanup_stale(7);

    EXIT_ALLOW
}

// === user_prompt_submit =====================================================

pub fn run_user_prompt_submit(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        return EXIT_ALLOW;
    }

    let raw = read_stdin();
    let event = HookEvent::from_json(&raw);

    // Plain-text fallback: hosts that predate the JSON protocol send the
    // prompt bare on stdin.
    let prompt = event
        .prompt
        .clone()
        .unwrap_or_else(|| raw.trim().to_string());
    let session_id = event
        .session_id
        .clone()
        .unwrap_or_else(|| format!("sess-{}", Utc::now().timestamp()));

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);
    state.subagent_counter = 0;
    state.in_subagent = false;
    state.current_agent_id = None;
    state.silent_tool_nudge_count = 0;
    state.last_user_interaction_time = Some(Utc::now());
    state.save(&state_path);

    let transcript = transcript_path(&event);
    with_orchestrator(ctx, |orchestrator| {
        if let Err(err) =
            orchestrator.handle_user_prompt_submit(&session_id, transcript.as_deref(), &prompt)
        {
            tracing::warn!(%err, "trace staging failed on user prompt");
        }
    });

    EXIT_ALLOW
}

// === post_tool_use ==========================================================

pub fn run_post_tool_use(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        return EXIT_ALLOW;
    }

    let event = HookEvent::from_json(&read_stdin());

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);
    state.tool_execution_count += 1;

    let store = ctx.open_store();

    // Pacing: poll, cleanup, decide, and sleep off any overrun.
    if let Some(store) = &store {
        let run = pacetrace_pacing::run_pacing_check(
            store,
            &state.session_id,
            &ctx.config.pacing_settings(),
            state.last_poll_time,
            state.last_cleanup_time,
        );

        if let Some(poll_time) = run.poll_time {
            state.last_poll_time = Some(poll_time);
        }
        if let Some(cleanup_time) = run.cleanup_time {
            state.last_cleanup_time = Some(cleanup_time);
        }

        if let Some(decision) = &run.decision
            && decision.should_throttle
            && decision.delay_seconds > 0
        {
            let delay = decision.delay_seconds.min(MAX_DELAY_SECONDS);
            record_blockage(
                Some(store),
                BlockageCategory::PacingQuota,
                &format!("Throttle delay {delay}s applied due to quota protection"),
                "post_tool_use",
                &state.session_id,
                Some(json!({"delay_seconds": delay})),
            );
            tracing::info!(delay, "throttling tool use");
            std::thread::sleep(std::time::Duration::from_secs(delay));
        }
    }

    state.save(&state_path);

    // Span export runs after pacing so a throttle never delays delivery of
    // already-collected observations on the next hook.
    if event.session_id.is_some() {
        let session_id = event.session_id.clone().unwrap_or_default();
        let transcript = transcript_path(&event);
        let tool = ToolInvocation {
            name: event.tool_name.clone(),
            input: event.tool_input.clone(),
            response: event.tool_response_text(),
        };

        with_orchestrator(ctx, |orchestrator| {
            if let Err(err) =
                orchestrator.handle_post_tool_use(&state, &session_id, transcript.as_deref(), &tool)
            {
                tracing::warn!(%err, "span export failed on post tool use");
            }
        });
    }

    EXIT_ALLOW
}

// === subagent_start / subagent_stop =========================================

pub fn run_subagent_start(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        return EXIT_ALLOW;
    }

    let event = HookEvent::from_json(&read_stdin());

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);
    state.enter_subagent();
    state.save(&state_path);

    let (Some(session_id), Some(agent_id)) = (&event.session_id, &event.agent_id) else {
        tracing::debug!("subagent start without session_id or agent_id");
        return EXIT_ALLOW;
    };
    let agent_type = event.agent_type.as_deref().unwrap_or("subagent");
    let parent_transcript = transcript_path(&event);

    with_orchestrator(ctx, |orchestrator| {
        if let Some(trace_id) = orchestrator.handle_subagent_start(
            session_id,
            agent_id,
            agent_type,
            parent_transcript.as_deref(),
        ) {
            state.subagent_traces.insert(
                agent_id.clone(),
                SubagentTraceRef {
                    trace_id,
                    parent_transcript_path: parent_transcript
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                },
            );
            state.current_agent_id = Some(agent_id.clone());
            state.save(&state_path);
        }
    });

    EXIT_ALLOW
}

pub fn run_subagent_stop(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        return EXIT_ALLOW;
    }

    let event = HookEvent::from_json(&read_stdin());

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);
    state.leave_subagent();
    state.save(&state_path);

    let agent_id = event.agent_id.clone();
    let trace_info = agent_id
        .as_deref()
        .and_then(|id| state.subagent_traces.get(id).cloned());

    let Some(trace_info) = trace_info else {
        tracing::debug!("subagent stop with no tracked trace");
        return EXIT_ALLOW;
    };

    let parent_session = event.session_id.clone().unwrap_or_default();
    let parent_transcript = transcript_path(&event).or_else(|| {
        let stored = &trace_info.parent_transcript_path;
        (!stored.is_empty()).then(|| PathBuf::from(stored))
    });
    let agent_transcript = event.agent_transcript_path.as_ref().map(PathBuf::from);

    with_orchestrator(ctx, |orchestrator| {
        if let Err(err) = orchestrator.handle_subagent_stop(
            &trace_info.trace_id,
            &parent_session,
            agent_id.as_deref(),
            parent_transcript.as_deref(),
            agent_transcript.as_deref(),
            event.last_assistant_message.as_deref(),
        ) {
            tracing::warn!(%err, "subagent finalization failed");
        }
    });

    if let Some(agent_id) = &agent_id {
        state.subagent_traces.remove(agent_id);
        if state.current_agent_id.as_deref() == Some(agent_id) {
            state.current_agent_id = None;
        }
        state.save(&state_path);
    }

    EXIT_ALLOW
}

// === pre_tool_use ===========================================================

pub fn run_pre_tool_use(ctx: &HookContext) -> i32 {
    let event = HookEvent::from_json(&read_stdin());

    let tool_name = event.tool_name.as_deref().unwrap_or_default();
    let file_path = event
        .tool_input
        .as_ref()
        .and_then(|input| input.get("file_path"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    // Only Write/Edit of source files are ever validated.
    if !matches!(tool_name, "Write" | "Edit")
        || file_path.is_empty()
        || !ctx.config.enabled
        || !ctx.config.intent_validation_enabled
        || !is_source_file(file_path)
    {
        emit_continue();
        return EXIT_ALLOW;
    }

    let proposed_code = event
        .tool_input
        .as_ref()
        .and_then(|input| {
            input
                .get("content")
                .or_else(|| input.get("new_string"))
                .and_then(|v| v.as_str())
        })
        .unwrap_or_default()
        .to_string();

    // The hook receives the parent transcript even inside a subagent; the
    // tool_use_id pins down the transcript that really carries this edit.
    let mut transcript = transcript_path(&event);
    if let (Some(parent), Some(tool_use_id)) = (&transcript, &event.tool_use_id)
        && let Some(resolved) =
            resolve_subagent_transcript(parent, event.session_id.as_deref(), tool_use_id)
    {
        transcript = Some(resolved);
    }

    let messages = transcript
        .as_deref()
        .and_then(|path| last_n_assistant_texts(path, 2).ok())
        .unwrap_or_default();

    let validator = ApproveAll;
    let verdict = validator.validate(&messages, &proposed_code, file_path, tool_name);

    if verdict.approved {
        emit_continue();
        return EXIT_ALLOW;
    }

    let session_id = event.session_id.as_deref().unwrap_or("unknown");
    record_blockage(
        ctx.open_store().as_ref(),
        blockage_category_for(&verdict),
        &verdict.feedback,
        "pre_tool_use",
        session_id,
        Some(json!({"tool": tool_name, "file_path": file_path})),
    );

    safe_print(&json!({"decision": "block", "reason": verdict.feedback}).to_string());
    EXIT_BLOCK
}

// === stop ===================================================================

pub fn run_stop(ctx: &HookContext) -> i32 {
    if !ctx.config.enabled {
        emit_continue();
        return EXIT_ALLOW;
    }

    let event = HookEvent::from_json(&read_stdin());
    let session_id = event.session_id.clone().unwrap_or_default();
    let transcript = transcript_path(&event);

    // Finalize the turn's trace regardless of any blocking decision below.
    if !session_id.is_empty() {
        with_orchestrator(ctx, |orchestrator| {
            if let Err(err) = orchestrator.handle_stop_finalize(&session_id, transcript.as_deref())
            {
                tracing::warn!(%err, "trace finalization failed on stop");
            }
        });
    }

    let Some(transcript) = transcript else {
        emit_continue();
        return EXIT_ALLOW;
    };

    // A wedged context window cannot produce any further response; blocking
    // here would loop the session forever.
    if detect_context_exhaustion(&transcript) {
        tracing::debug!("context exhaustion detected, allowing exit");
        emit_continue();
        return EXIT_ALLOW;
    }

    let state_path = ctx.paths.hook_state_file();
    let mut state = HookState::load(&state_path);

    if detect_silent_tool_stop(&transcript) {
        let max_nudges = ctx.config.max_silent_tool_nudges;
        if state.silent_tool_nudge_count < max_nudges {
            state.silent_tool_nudge_count += 1;
            state.save(&state_path);

            let reason = "You stopped after a tool use without providing text output. \
                          Please continue your work.";
            record_blockage(
                ctx.open_store().as_ref(),
                BlockageCategory::PacingTempo,
                reason,
                "stop",
                &session_id,
                Some(json!({"nudge": state.silent_tool_nudge_count, "max": max_nudges})),
            );
            safe_print(&json!({"decision": "block", "reason": reason}).to_string());
            return EXIT_BLOCK;
        }
        // Budget exhausted: reset and let the session end.
        state.silent_tool_nudge_count = 0;
        state.save(&state_path);
        emit_continue();
        return EXIT_ALLOW;
    }

    if !should_run_tempo(&ctx.config, &state) {
        emit_continue();
        return EXIT_ALLOW;
    }

    // Completion judgment is an external collaborator; the default validator
    // approves, so the gate only records and blocks when one is wired in.
    let messages = last_n_assistant_texts(&transcript, 5).unwrap_or_default();
    let validator = ApproveAll;
    let verdict = validator.validate(&messages, "", "", "stop");

    if verdict.approved {
        emit_continue();
        return EXIT_ALLOW;
    }

    record_blockage(
        ctx.open_store().as_ref(),
        BlockageCategory::PacingTempo,
        &verdict.feedback,
        "stop",
        &session_id,
        None,
    );
    safe_print(&json!({"decision": "block", "reason": verdict.feedback}).to_string());
    EXIT_BLOCK
}

/// Tempo precedence: session override, then the configured mode; auto mode
/// gates only when the user has been idle past the threshold.
fn should_run_tempo(config: &Config, state: &HookState) -> bool {
    if let Some(enabled) = state.tempo_session_enabled {
        return enabled;
    }

    match config.tempo_mode {
        TempoMode::Off => false,
        TempoMode::On => true,
        TempoMode::Auto => match state.last_user_interaction_time {
            // No interaction recorded: assume unattended.
            None => true,
            Some(last) => {
                let idle_minutes = (Utc::now() - last).num_seconds() as f64 / 60.0;
                idle_minutes >= config.auto_tempo_threshold_minutes as f64
            }
        },
    }
}

fn emit_continue() {
    safe_print(&json!({"continue": true}).to_string());
}
