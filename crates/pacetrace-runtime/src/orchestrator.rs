use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use pacetrace_engine::{
    ProjectContext, create_generation, create_hook_tool_span, create_subagent_trace,
    create_text_span, create_tool_span, create_trace_for_turn, finalize_subagent_trace,
    finalize_trace, intel_trace_update, new_turn_trace_id, parse_intel_line, short_id,
    subagent_trace_id,
};
use pacetrace_push::Ingest;
use pacetrace_secrets::{SecretsVault, sanitize_batch, store_declarations};
use pacetrace_store::{Store, increment_metric};
use pacetrace_transcript::{
    BlockPayload, extract_content_blocks, extract_subagent_output, extract_task_tool_prompt,
    extract_task_tool_result, last_n_assistant_texts, session_model,
};
use pacetrace_types::{EventKind, IngestionEvent, MetricKind, SpanBody, TraceBody};

use crate::config::Config;
use crate::hook_state::HookState;
use crate::session::{SessionState, StateManager, TraceMeta};

/// Assistant-message windows scanned for secret declarations.
const SECRET_SCAN_WINDOW_TOOL: usize = 3;
const SECRET_SCAN_WINDOW_STOP: usize = 5;

/// Tool data the post-tool-use hook observed directly.
#[derive(Debug, Clone, Default)]
pub struct ToolInvocation {
    pub name: Option<String>,
    pub input: Option<Value>,
    pub response: Option<String>,
}

/// Per-hook trace lifecycle driver.
///
/// Stateless across processes: everything it knows between invocations lives
/// in the session state files and the hook state passed in by the caller.
/// The push seam is a trait so flows are testable without a network.
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a Store,
    vault_path: PathBuf,
    states: StateManager,
    pusher: &'a dyn Ingest,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a Store,
        vault_path: PathBuf,
        states: StateManager,
        pusher: &'a dyn Ingest,
    ) -> Self {
        Self {
            config,
            store,
            vault_path,
            states,
            pusher,
        }
    }

    pub fn export_active(&self) -> bool {
        self.config.export.is_active()
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    /// User-prompt-submit: stage a fresh trace, do NOT push.
    ///
    /// Deferring the push until the next sanitize opportunity guarantees that
    /// a secret declared later in the same turn can still be masked out of
    /// this trace's input. A stale pending trace (two prompts with no
    /// intervening tool use) is flushed first so it is not lost.
    pub fn handle_user_prompt_submit(
        &self,
        session_id: &str,
        transcript_path: Option<&Path>,
        user_message: &str,
    ) -> Result<()> {
        if !self.export_active() {
            return Ok(());
        }

        let existing = self.states.read(session_id);
        let is_first_trace = existing.is_none();
        let mut state = existing.unwrap_or_else(|| SessionState::new(session_id));

        if state.pending_trace.is_some() {
            self.flush_pending_trace(&mut state, "user_prompt_submit");
        }

        let trace_id = new_turn_trace_id(session_id);
        let user_id = pacetrace_pacing::user_email();
        let model = transcript_path.and_then(session_model);
        let project = std::env::current_dir()
            .ok()
            .map(|cwd| ProjectContext::gather(&cwd));

        let now = now_iso();
        let trace = create_trace_for_turn(
            session_id,
            &trace_id,
            user_message,
            user_id.as_deref(),
            project.as_ref(),
            model.as_deref(),
            &now,
        );

        state.trace_id = trace_id.clone();
        state.metadata = TraceMeta {
            current_trace_id: Some(trace_id.clone()),
            trace_start_line: state.last_pushed_line,
            is_first_trace_in_session: is_first_trace,
            ..TraceMeta::default()
        };
        state.pending_trace = Some(vec![trace_event(EventKind::TraceCreate, trace, &now)]);
        self.states.write(&state)?;

        tracing::info!(%trace_id, "staged pending trace for user prompt");
        Ok(())
    }

    /// Post-tool-use: the hot path.
    ///
    /// Secrets first, then intel to the *current* trace, then the deferred
    /// trace push, then spans for the tool call. The line pointer advances
    /// even when the push fails: a timed-out push was almost certainly
    /// delivered, and duplicates cost more than rare loss.
    pub fn handle_post_tool_use(
        &self,
        hook_state: &HookState,
        session_id: &str,
        transcript_path: Option<&Path>,
        tool: &ToolInvocation,
    ) -> Result<()> {
        self.harvest_secrets(transcript_path, SECRET_SCAN_WINDOW_TOOL);

        if !self.export_active() {
            return Ok(());
        }

        let Some(mut parent_state) = self.states.read(session_id) else {
            tracing::warn!(session_id, "no session state, skipping span export");
            return Ok(());
        };

        // Subagent context: spans created while a subagent runs belong to the
        // subagent's trace, and the line pointer must come from the
        // subagent's own state file.
        let mut subagent_state: Option<SessionState> = None;
        if hook_state.in_subagent
            && let Some(agent_id) = &hook_state.current_agent_id
            && let Some(info) = hook_state.subagent_traces.get(agent_id)
        {
            let sub_session = format!("subagent-{agent_id}");
            let mut sub = self
                .states
                .read(&sub_session)
                .unwrap_or_else(|| SessionState::new(&sub_session));
            sub.trace_id = info.trace_id.clone();
            sub.metadata.current_trace_id = Some(info.trace_id.clone());
            subagent_state = Some(sub);
        }

        let current_trace_id = match &subagent_state {
            Some(sub) => sub.metadata.current_trace_id.clone(),
            None => parent_state.metadata.current_trace_id.clone(),
        };
        let Some(trace_id) = current_trace_id else {
            tracing::warn!(session_id, "no current trace id, skipping span export");
            return Ok(());
        };

        // Intel describes the current prompt, so it attaches to the current
        // trace immediately rather than waiting for the next one.
        if let Some(intel) = self.parse_recent_intel(transcript_path) {
            let now = now_iso();
            let event = IngestionEvent::new(
                format!("intel-{}-{}", trace_id, short_id()),
                now,
                EventKind::TraceCreate,
                serde_json::to_value(intel_trace_update(&trace_id, &intel))?,
            );
            let (pushed, _) = self.pusher.push_batch(&[event.into_value()]);
            if !pushed {
                tracing::warn!(%trace_id, "failed to push intel update");
            }
        }

        // The parent's staged trace is pushed here even when the spans below
        // belong to a subagent; the subagent's state never carries a pending
        // trace, so the parent copy is the one that must survive.
        if parent_state.pending_trace.is_some() {
            self.flush_pending_trace(&mut parent_state, "post_tool_use");
        }

        let (mut work_state, in_subagent) = match subagent_state {
            Some(sub) => (sub, true),
            None => (parent_state, false),
        };

        let now = now_iso();
        let mut batch = Vec::new();
        let mut max_line = work_state.last_pushed_line;

        if let Some(response) = &tool.response {
            // The hook fires before the output reaches the transcript; this
            // span is the only view of the current tool's response.
            let span =
                create_hook_tool_span(&trace_id, tool.name.as_deref(), tool.input.clone(), response, &now);
            batch.push(span_event(span, &now));
        } else if let Some(path) = transcript_path {
            let blocks = extract_content_blocks(path, work_state.last_pushed_line)
                .unwrap_or_default();
            if blocks.is_empty() {
                return Ok(());
            }

            for block in &blocks {
                let timestamp = if block.timestamp.is_empty() {
                    now.clone()
                } else {
                    block.timestamp.clone()
                };
                let span = match &block.payload {
                    BlockPayload::Text { text } => {
                        create_text_span(&trace_id, text, &timestamp, block.line_number)
                    }
                    BlockPayload::ToolUse {
                        tool_name,
                        tool_input,
                        ..
                    } => create_tool_span(&trace_id, tool_name, tool_input.clone(), "", &timestamp),
                };
                batch.push(span_event(span, &now));
                max_line = max_line.max(block.line_number);
            }
        } else {
            return Ok(());
        }

        let sanitized = self.sanitize(&batch);
        let (success, acknowledged) = self.pusher.push_batch(&sanitized);

        // Monotone line pointer, advanced on success AND failure.
        work_state.last_pushed_line = work_state.last_pushed_line.max(max_line);
        if let Err(err) = self.states.write(&work_state) {
            tracing::warn!(%err, "failed to persist session state after span push");
        }

        if success {
            for _ in 0..acknowledged {
                if let Err(err) = increment_metric(self.store, MetricKind::Spans) {
                    tracing::warn!(%err, "failed to increment spans metric");
                }
            }
            tracing::debug!(
                %trace_id,
                spans = batch.len(),
                acknowledged,
                in_subagent,
                "pushed span batch"
            );
        } else {
            tracing::warn!(
                %trace_id,
                line = work_state.last_pushed_line,
                "span push failed; line pointer advanced to prevent duplicates"
            );
        }

        Ok(())
    }

    /// Stop-finalize: attach output, end time and token usage to the turn's
    /// trace. Separate from the pending-trace push because the trace was
    /// created at prompt submit; this is an upsert.
    pub fn handle_stop_finalize(
        &self,
        session_id: &str,
        transcript_path: Option<&Path>,
    ) -> Result<()> {
        if !self.export_active() {
            return Ok(());
        }

        let Some(mut state) = self.states.read(session_id) else {
            tracing::warn!(session_id, "no session state, cannot finalize trace");
            return Ok(());
        };
        let Some(trace_id) = state.metadata.current_trace_id.clone() else {
            tracing::warn!(session_id, "no current trace id, cannot finalize");
            return Ok(());
        };

        if state.pending_trace.is_some() {
            self.flush_pending_trace(&mut state, "stop_finalize");
        }

        self.harvest_secrets(transcript_path, SECRET_SCAN_WINDOW_STOP);

        let Some(path) = transcript_path else {
            return Ok(());
        };

        let now = now_iso();
        let (update, tokens) = finalize_trace(&trace_id, path, state.metadata.trace_start_line, &now);

        let mut batch = vec![
            IngestionEvent::new(
                format!("finalize-{}-{}", trace_id, short_id()),
                now.clone(),
                EventKind::TraceCreate,
                serde_json::to_value(&update)?,
            )
            .into_value(),
        ];

        let model = session_model(path).unwrap_or_else(|| "unknown".to_string());
        if let Some(generation) = create_generation(&trace_id, &model, &tokens, &now) {
            batch.push(
                IngestionEvent::new(
                    generation.id.clone(),
                    now.clone(),
                    EventKind::GenerationCreate,
                    serde_json::to_value(&generation)?,
                )
                .into_value(),
            );
        }

        let sanitized = self.sanitize(&batch);
        let (success, _) = self.pusher.push_batch(&sanitized);
        if success {
            tracing::info!(%trace_id, "finalized trace with output");
        } else {
            tracing::warn!(%trace_id, "failed to finalize trace");
        }

        Ok(())
    }

    /// Subagent-start: push a sibling trace under the parent's session id and
    /// initialize the subagent's own state file. Returns the new trace id.
    pub fn handle_subagent_start(
        &self,
        parent_session_id: &str,
        agent_id: &str,
        agent_type: &str,
        parent_transcript_path: Option<&Path>,
    ) -> Option<String> {
        if !self.export_active() {
            return None;
        }

        let task_prompt = parent_transcript_path
            .and_then(|path| extract_task_tool_prompt(path, None))
            .unwrap_or_default();

        let now = now_iso();
        let trace_id = subagent_trace_id(parent_session_id, agent_type);
        let subagent_session = format!("subagent-{agent_id}");
        let trace = create_subagent_trace(
            &trace_id,
            parent_session_id,
            agent_type,
            &subagent_session,
            &task_prompt,
            &now,
        );

        // The Task prompt may itself carry secrets.
        let batch = vec![trace_event(EventKind::TraceCreate, trace, &now)];
        let sanitized = self.sanitize(&batch);
        let (success, _) = self.pusher.push_batch(&sanitized);
        if !success {
            tracing::warn!(agent_id, "failed to push subagent trace");
            return None;
        }

        if let Err(err) = increment_metric(self.store, MetricKind::Traces) {
            tracing::warn!(%err, "failed to increment traces metric");
        }

        let mut state = SessionState::new(&subagent_session);
        state.trace_id = trace_id.clone();
        state.metadata.current_trace_id = Some(trace_id.clone());
        if let Err(err) = self.states.write(&state) {
            tracing::warn!(%err, "failed to initialize subagent state");
        }

        tracing::info!(%trace_id, agent_id, parent_session_id, "created subagent trace");
        Some(trace_id)
    }

    /// Subagent-stop: finalize the subagent's trace with its own output, then
    /// flush the parent's pending trace (post-tool-use never ran in the
    /// parent session while the subagent was executing).
    pub fn handle_subagent_stop(
        &self,
        trace_id: &str,
        parent_session_id: &str,
        agent_id: Option<&str>,
        parent_transcript_path: Option<&Path>,
        agent_transcript_path: Option<&Path>,
        last_assistant_message: Option<&str>,
    ) -> Result<()> {
        if !self.export_active() {
            return Ok(());
        }

        // The subagent's own transcript already holds the final message; the
        // parent's tool-result block may not exist yet when this hook fires,
        // and without the agent-id filter it could belong to a sibling.
        let output = agent_transcript_path
            .and_then(extract_subagent_output)
            .or_else(|| {
                parent_transcript_path.and_then(|path| extract_task_tool_result(path, agent_id))
            })
            .or_else(|| last_assistant_message.map(str::to_string))
            .unwrap_or_default();

        let now = now_iso();
        let update = finalize_subagent_trace(trace_id, &output, &now);
        let batch = vec![
            IngestionEvent::new(
                format!("finalize-{}-{}", trace_id, short_id()),
                now,
                EventKind::TraceCreate,
                serde_json::to_value(&update)?,
            )
            .into_value(),
        ];

        let sanitized = self.sanitize(&batch);
        let (success, _) = self.pusher.push_batch(&sanitized);
        if success {
            tracing::info!(%trace_id, "finalized subagent trace");
        } else {
            tracing::warn!(%trace_id, "failed to finalize subagent trace");
        }

        if let Some(mut parent) = self.states.read(parent_session_id)
            && parent.pending_trace.is_some()
        {
            self.flush_pending_trace(&mut parent, "subagent_stop");
        }

        Ok(())
    }

    /// Sanitize and push a staged trace, then clear it from state.
    ///
    /// The clear is unconditional: retrying a failed pending push on every
    /// subsequent hook would loop forever against a dead backend.
    pub fn flush_pending_trace(&self, state: &mut SessionState, caller: &str) -> bool {
        let Some(pending) = state.pending_trace.clone() else {
            return false;
        };
        if !self.export_active() {
            return false;
        }

        tracing::debug!(session_id = %state.session_id, caller, "flushing pending trace");

        let sanitized = self.sanitize(&pending);
        let (success, _) = self.pusher.push_batch(&sanitized);

        if success {
            if state.metadata.is_first_trace_in_session
                && let Err(err) = increment_metric(self.store, MetricKind::Sessions)
            {
                tracing::warn!(%err, "failed to increment sessions metric");
            }
            if let Err(err) = increment_metric(self.store, MetricKind::Traces) {
                tracing::warn!(%err, "failed to increment traces metric");
            }
        } else {
            tracing::warn!(session_id = %state.session_id, caller, "pending trace push failed");
        }

        state.pending_trace = None;
        if let Err(err) = self.states.write(state) {
            tracing::warn!(%err, "failed to persist state after pending flush");
        }

        true
    }

    /// Store any secret declarations from the recent assistant messages.
    /// Runs before sanitization so a secret declared in the same turn is in
    /// the vault before this turn's payloads are built.
    fn harvest_secrets(&self, transcript_path: Option<&Path>, window: usize) {
        let Some(path) = transcript_path else { return };
        let Ok(texts) = last_n_assistant_texts(path, window) else {
            return;
        };
        if !texts.iter().any(|t| t.contains("🔐")) {
            return;
        }

        let vault = match SecretsVault::open(&self.vault_path) {
            Ok(vault) => vault,
            Err(err) => {
                tracing::warn!(%err, "failed to open secrets vault");
                return;
            }
        };
        for text in texts {
            if text.contains("🔐")
                && let Err(err) = store_declarations(&text, &vault)
            {
                tracing::warn!(%err, "failed to store secret declarations");
            }
        }
    }

    fn parse_recent_intel(
        &self,
        transcript_path: Option<&Path>,
    ) -> Option<pacetrace_engine::IntelFields> {
        let path = transcript_path?;
        let texts = last_n_assistant_texts(path, SECRET_SCAN_WINDOW_TOOL).ok()?;
        texts
            .iter()
            .rev()
            .filter(|text| text.contains('§'))
            .find_map(|text| parse_intel_line(text))
    }

    fn sanitize(&self, batch: &[Value]) -> Vec<Value> {
        match SecretsVault::open(&self.vault_path) {
            Ok(vault) => sanitize_batch(batch, &vault, Some(self.store)),
            Err(err) => {
                tracing::warn!(%err, "failed to open vault for sanitization");
                batch.to_vec()
            }
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn trace_event(kind: EventKind, body: TraceBody, now: &str) -> Value {
    let id = body.id.clone();
    IngestionEvent::new(
        id,
        now,
        kind,
        serde_json::to_value(body).unwrap_or(Value::Null),
    )
    .into_value()
}

fn span_event(span: SpanBody, now: &str) -> Value {
    IngestionEvent::new(
        span.id.clone(),
        now,
        EventKind::SpanCreate,
        serde_json::to_value(span).unwrap_or(Value::Null),
    )
    .into_value()
}
