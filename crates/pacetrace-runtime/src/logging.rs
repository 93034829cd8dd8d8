use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing_subscriber::EnvFilter;

/// Dated log files are swept after this many days.
const LOG_RETENTION_DAYS: u64 = 15;

const LOG_PREFIX: &str = "pacetrace-";
const LOG_SUFFIX: &str = ".log";

/// Initialize logging to a dated file under the config dir.
///
/// Hooks share stdout/stderr with the host protocol, so diagnostics must
/// never land there; if the log file cannot be opened, logging is dropped
/// rather than redirected.
pub fn init_logging(log_dir: &Path, filter: &str) {
    sweep_old_logs(log_dir, LOG_RETENTION_DAYS);

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_name = format!("{}{}{}", LOG_PREFIX, today(), LOG_SUFFIX);
    let Ok(()) = std::fs::create_dir_all(log_dir) else {
        return;
    };
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(file_name))
    else {
        return;
    };

    // try_init: a second hook handler in the same process is a no-op.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
}

/// Delete rotated log files older than `retention_days`.
pub fn sweep_old_logs(log_dir: &Path, retention_days: u64) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };
    let horizon = Duration::from_secs(retention_days * 86_400);
    let now = SystemTime::now();

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
            continue;
        }

        let expired = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|mtime| now.duration_since(mtime).ok())
            .is_some_and(|age| age > horizon);
        if expired {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
