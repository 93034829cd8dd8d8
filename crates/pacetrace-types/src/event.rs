use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Batch event type understood by the ingestion endpoint.
///
/// `trace-create` has upsert semantics on the backend, so finalization and
/// intel attachment reuse it rather than relying on `trace-update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TraceCreate,
    TraceUpdate,
    SpanCreate,
    GenerationCreate,
}

/// One element of the `{batch: [...]}` array sent to the backend.
///
/// The body is kept as a JSON value: the sanitizer walks it generically and
/// the wire format owns the field names, not us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub body: Value,
}

impl IngestionEvent {
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>, kind: EventKind, body: Value) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            kind,
            body,
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Trace body for a single user turn (camelCase wire names).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Span body: one tool invocation or one assistant text block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanBody {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Token usage attached to a generation observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
}

/// Generation body carrying accumulated token counts for a finalized turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationBody {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    pub model: String,
    pub usage: GenerationUsage,
    pub start_time: String,
}
