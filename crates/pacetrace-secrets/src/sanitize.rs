use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use pacetrace_store::{Store, increment_secrets_masked};

use crate::mask::{build_pattern, mask_value};
use crate::vault::SecretsVault;

// Process-wide compiled-pattern cache. Hook processes are short-lived, so
// "initialized on first use, discarded on exit" is the whole lifecycle.
static PATTERN_CACHE: Lazy<Mutex<Option<(Vec<u8>, Option<Regex>)>>> =
    Lazy::new(|| Mutex::new(None));

/// Mask an outbound batch against the vault and restore protected fields.
///
/// Every string leaf in every event is masked; afterwards each `userId` at
/// any depth is restored from the pre-masked batch, because the user identity
/// (the account email) must survive even when it appears in the vault. A
/// non-zero mask count increments the `secrets_masked` bucket.
pub fn sanitize_batch(batch: &[Value], vault: &SecretsVault, store: Option<&Store>) -> Vec<Value> {
    let secrets = match vault.values() {
        Ok(values) => values,
        Err(err) => {
            tracing::warn!(%err, "failed to load secrets, pushing batch unmasked");
            return batch.to_vec();
        }
    };

    let mut total = 0usize;
    let mut sanitized = Vec::with_capacity(batch.len());

    with_cached_pattern(&secrets, |pattern| {
        for event in batch {
            let (mut masked, count) = mask_value(event, pattern);
            total += count;
            restore_user_ids(event, &mut masked);
            sanitized.push(masked);
        }
    });

    if total > 0 {
        tracing::debug!(masked = total, "masked secret occurrences in outbound batch");
        if let Some(store) = store
            && let Err(err) = increment_secrets_masked(store, total as u64)
        {
            tracing::warn!(%err, "failed to record secrets_masked metric");
        }
    }

    sanitized
}

/// Run `f` with the cached compiled pattern, rebuilding when the secret set
/// changed. The cache key is a digest of the sorted values.
fn with_cached_pattern(secrets: &[String], f: impl FnOnce(Option<&Regex>)) {
    let digest = secrets_digest(secrets);

    let mut guard = match PATTERN_CACHE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let stale = match guard.as_ref() {
        Some((cached_digest, _)) => *cached_digest != digest,
        None => true,
    };
    if stale {
        *guard = Some((digest, build_pattern(secrets)));
    }

    let pattern = guard.as_ref().and_then(|(_, p)| p.as_ref());
    f(pattern);
}

fn secrets_digest(secrets: &[String]) -> Vec<u8> {
    let mut sorted: Vec<&String> = secrets.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for value in sorted {
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().to_vec()
}

/// Copy every `userId` from the original into the masked copy, walking both
/// structures in parallel.
fn restore_user_ids(original: &Value, masked: &mut Value) {
    match (original, masked) {
        (Value::Object(orig), Value::Object(done)) => {
            if let Some(user_id) = orig.get("userId") {
                done.insert("userId".to_string(), user_id.clone());
            }
            for (key, orig_child) in orig {
                if let Some(done_child) = done.get_mut(key) {
                    restore_user_ids(orig_child, done_child);
                }
            }
        }
        (Value::Array(orig), Value::Array(done)) => {
            for (orig_item, done_item) in orig.iter().zip(done.iter_mut()) {
                restore_user_ids(orig_item, done_item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::SecretKind;
    use pacetrace_store::secrets_masked_24h;
    use serde_json::json;

    fn vault_with(dir: &tempfile::TempDir, secrets: &[&str]) -> SecretsVault {
        let vault = SecretsVault::open(&dir.path().join("secrets.db")).unwrap();
        for secret in secrets {
            vault.create(SecretKind::Text, secret).unwrap();
        }
        vault
    }

    #[test]
    fn test_batch_strings_masked_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with(&dir, &["sk-test-abc123def456"]);

        let batch = vec![json!({
            "id": "e-1",
            "type": "trace-create",
            "body": {
                "id": "t-1",
                "input": "Use this API key: sk-test-abc123def456",
                "metadata": {"note": "sk-test-abc123def456 again"},
            }
        })];

        let sanitized = sanitize_batch(&batch, &vault, None);
        let text = sanitized[0].to_string();
        assert!(!text.contains("sk-test-abc123def456"));
        assert!(sanitized[0]["body"]["input"]
            .as_str()
            .unwrap()
            .contains("*** MASKED ***"));
    }

    #[test]
    fn test_user_id_survives_masking() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with(&dir, &["user@example.com"]);

        let batch = vec![json!({
            "id": "e-1",
            "body": {
                "userId": "user@example.com",
                "input": "contact user@example.com for access",
            }
        })];

        let sanitized = sanitize_batch(&batch, &vault, None);
        assert_eq!(sanitized[0]["body"]["userId"], "user@example.com");
        assert_eq!(
            sanitized[0]["body"]["input"],
            "contact *** MASKED *** for access"
        );
    }

    #[test]
    fn test_mask_count_recorded_in_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with(&dir, &["tok-777"]);
        let store = Store::open_in_memory().unwrap();

        let batch = vec![json!({"body": {"a": "tok-777", "b": "tok-777"}})];
        sanitize_batch(&batch, &vault, Some(&store));

        assert_eq!(secrets_masked_24h(&store).unwrap(), 2);
    }

    #[test]
    fn test_empty_vault_passes_batch_through() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with(&dir, &[]);
        let store = Store::open_in_memory().unwrap();

        let batch = vec![json!({"body": {"input": "nothing sensitive"}})];
        let sanitized = sanitize_batch(&batch, &vault, Some(&store));
        assert_eq!(sanitized, batch);
        assert_eq!(secrets_masked_24h(&store).unwrap(), 0);
    }

    #[test]
    fn test_cache_refreshes_when_secret_set_changes() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_with(&dir, &["first-secret"]);

        let batch = vec![json!({"body": {"x": "first-secret second-secret"}})];
        let pass_one = sanitize_batch(&batch, &vault, None);
        assert_eq!(pass_one[0]["body"]["x"], "*** MASKED *** second-secret");

        vault.create(SecretKind::Text, "second-secret").unwrap();
        let pass_two = sanitize_batch(&batch, &vault, None);
        assert_eq!(pass_two[0]["body"]["x"], "*** MASKED *** *** MASKED ***");
    }
}
