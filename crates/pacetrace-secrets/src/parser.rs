use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::vault::{SecretKind, SecretsVault};

// Declaration markers scanned in assistant messages.
const TEXT_MARKER: &str = "🔐 SECRET_TEXT:";
const FILE_MARKER: &str = "🔐 SECRET_FILE:";

// Identity, not a secret: addresses declared as SECRET_TEXT are rejected so
// the account email can never be swallowed by the masker.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern")
});

/// Extract `🔐 SECRET_TEXT:` declarations. One per line, value = remainder of
/// the line with trailing whitespace and markdown punctuation stripped.
pub fn parse_text_secrets(response: &str) -> Vec<String> {
    declarations(response, TEXT_MARKER)
        .into_iter()
        .filter(|value| !EMAIL_RE.is_match(value))
        .collect()
}

/// Extract `🔐 SECRET_FILE:` declarations.
///
/// Values starting with `/` or `~` are treated as paths: the file content is
/// stored when readable, the path itself otherwise. Empty files are skipped
/// entirely. Anything else is stored literally.
pub fn parse_file_secrets(response: &str) -> Vec<String> {
    let mut results = Vec::new();

    for value in declarations(response, FILE_MARKER) {
        if value.starts_with('/') || value.starts_with('~') {
            let expanded = expand_home(&value);
            match std::fs::read_to_string(&expanded) {
                Ok(content) if content.is_empty() => {
                    tracing::warn!(path = %expanded.display(), "empty SECRET_FILE skipped");
                }
                Ok(content) => results.push(content),
                Err(err) => {
                    tracing::warn!(path = %expanded.display(), %err, "unreadable SECRET_FILE, storing path");
                    results.push(value);
                }
            }
        } else {
            results.push(value);
        }
    }

    results
}

/// Parse all declarations from an assistant message and store them.
/// Returns `(id, kind)` per stored secret.
pub fn store_declarations(response: &str, vault: &SecretsVault) -> Result<Vec<(i64, SecretKind)>> {
    let mut stored = Vec::new();

    for value in parse_text_secrets(response) {
        let id = vault.create(SecretKind::Text, &value)?;
        stored.push((id, SecretKind::Text));
    }
    for value in parse_file_secrets(response) {
        let id = vault.create(SecretKind::File, &value)?;
        stored.push((id, SecretKind::File));
    }

    Ok(stored)
}

fn declarations(response: &str, marker: &str) -> Vec<String> {
    let mut values = Vec::new();

    for line in response.lines() {
        let Some(idx) = line.find(marker) else {
            continue;
        };
        let raw = &line[idx + marker.len()..];
        let value = raw.trim().trim_end_matches(['`', '*', '_']);
        if !value.is_empty() {
            values.push(value.to_string());
        }
    }

    values
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(value)
}
