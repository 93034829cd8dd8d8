use regex::Regex;
use serde_json::Value;

/// Literal replacement for every matched secret.
pub const MASK_PLACEHOLDER: &str = "*** MASKED ***";

/// Build one alternation pattern over all secret values.
///
/// Values are regex-escaped so a secret containing metacharacters matches
/// byte-for-byte. Empty values are dropped; no values means no pattern and
/// masking becomes a no-op.
pub fn build_pattern(secrets: &[String]) -> Option<Regex> {
    let escaped: Vec<String> = secrets
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s))
        .collect();

    if escaped.is_empty() {
        return None;
    }

    Regex::new(&escaped.join("|")).ok()
}

/// Replace every occurrence of a secret with the placeholder.
/// Returns the masked text and the exact replacement count.
pub fn mask_text(content: &str, pattern: Option<&Regex>) -> (String, usize) {
    let Some(pattern) = pattern else {
        return (content.to_string(), 0);
    };

    let count = pattern.find_iter(content).count();
    if count == 0 {
        return (content.to_string(), 0);
    }

    (
        pattern.replace_all(content, MASK_PLACEHOLDER).into_owned(),
        count,
    )
}

/// Deep-copy a JSON value with every string leaf masked.
///
/// Objects and arrays are recursed preserving shape; non-string scalars are
/// copied unchanged. The count is the sum over all leaves.
pub fn mask_value(data: &Value, pattern: Option<&Regex>) -> (Value, usize) {
    match data {
        Value::String(s) => {
            let (masked, count) = mask_text(s, pattern);
            (Value::String(masked), count)
        }
        Value::Object(map) => {
            let mut result = serde_json::Map::with_capacity(map.len());
            let mut total = 0;
            for (key, value) in map {
                let (masked, count) = mask_value(value, pattern);
                result.insert(key.clone(), masked);
                total += count;
            }
            (Value::Object(result), total)
        }
        Value::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            let mut total = 0;
            for item in items {
                let (masked, count) = mask_value(item, pattern);
                result.push(masked);
                total += count;
            }
            (Value::Array(result), total)
        }
        other => (other.clone(), 0),
    }
}
