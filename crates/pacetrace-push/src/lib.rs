// The only component that talks to the observability backend.
// Delivery is best-effort, at-most-once: a timed-out push is treated as
// probably-delivered by callers, never retried here.

use std::time::Duration;

use serde_json::Value;

/// Default request budget. Raised from an earlier 2 s after observing pushes
/// that completed successfully just past the old deadline.
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// Seam between the orchestrator and the wire.
///
/// Returns `(success, acknowledged_count)`: success when at least one item
/// was acknowledged or the batch was empty; the count is the backend's
/// per-item accounting, not the submitted batch length.
pub trait Ingest {
    fn push_batch(&self, batch: &[Value]) -> (bool, usize);
}

/// HTTP client for the ingestion endpoint.
pub struct BackendClient {
    base_url: String,
    public_key: String,
    secret_key: String,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: &str, public_key: &str, secret_key: &str) -> Self {
        Self::with_timeout(
            base_url,
            public_key,
            secret_key,
            Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        public_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
            timeout,
        }
    }

    fn ingestion_url(&self) -> String {
        format!("{}/api/public/ingestion", self.base_url)
    }
}

impl Ingest for BackendClient {
    fn push_batch(&self, batch: &[Value]) -> (bool, usize) {
        if batch.is_empty() {
            return (true, 0);
        }

        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(%err, "failed to build ingestion client");
                return (false, 0);
            }
        };

        let response = client
            .post(self.ingestion_url())
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&serde_json::json!({"batch": batch}))
            .send();

        // The secret key must never reach the log stream, so errors are
        // reported without the request itself.
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.json::<Value>() {
                    Ok(body) => parse_ingestion_response(status, &body, batch.len()),
                    Err(err) => {
                        tracing::warn!(status, %err, "unparseable ingestion response");
                        (false, 0)
                    }
                }
            }
            Err(err) if err.is_timeout() => {
                tracing::warn!(timeout = ?self.timeout, "batch push timed out");
                (false, 0)
            }
            Err(err) => {
                tracing::warn!(%err, "batch push failed");
                (false, 0)
            }
        }
    }
}

/// Interpret the ingestion response.
///
/// The backend returns HTTP 200 even when individual items fail; the body's
/// `successes` array is the authoritative per-item acknowledgment.
pub fn parse_ingestion_response(status: u16, body: &Value, batch_len: usize) -> (bool, usize) {
    if !(200..300).contains(&status) && status != 207 {
        tracing::warn!(status, "batch push rejected");
        return (false, 0);
    }

    let successes = body
        .get("successes")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    let errors = body
        .get("errors")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    if errors > 0 {
        tracing::warn!(errors, successes, batch_len, "batch partially failed");
    }

    if successes > 0 {
        (true, successes)
    } else if batch_len == 0 {
        (true, 0)
    } else {
        tracing::warn!(batch_len, "all batch events failed");
        (false, 0)
    }
}
