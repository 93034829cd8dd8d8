// Shared relational store for hook processes.
// WAL mode + busy timeout + bounded retry; raw state lives in JSON files,
// the store is only for durable telemetry rows and metric counters.

mod db;
mod error;
mod metrics;
mod schema;

pub use db::{BlockageCount, Store};
pub use error::{Error, Result};
pub use metrics::{
    Metrics24h, align_to_bucket, increment_metric, increment_secrets_masked, metrics_24h,
    parse_metric, secrets_masked_24h,
};
pub use schema::SCHEMA_VERSION;
