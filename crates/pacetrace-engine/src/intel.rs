use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// First rune of an intel line.
const INTEL_MARKER: char = '§';

static FRUSTRATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"△(\d+\.?\d*)").unwrap());
static SPECIFICITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"◎(surg|const|outc|expl)").unwrap());
static TASK_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"■(bug|feat|refac|research|test|docs|debug|conf|other)").unwrap());
static QUALITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"◇(\d+\.?\d*)").unwrap());
static ITERATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"↻(\d+)").unwrap());

/// Prompt-intelligence metadata parsed from a `§` line.
///
/// Fields are validated independently; an invalid field is omitted, never
/// defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntelFields {
    pub frustration: Option<f64>,
    pub specificity: Option<String>,
    pub task_type: Option<String>,
    pub quality: Option<f64>,
    pub iteration: Option<u8>,
}

impl IntelFields {
    pub fn is_empty(&self) -> bool {
        self.frustration.is_none()
            && self.specificity.is_none()
            && self.task_type.is_none()
            && self.quality.is_none()
            && self.iteration.is_none()
    }

    /// `intel_*` keys for trace metadata.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(v) = self.frustration {
            map.insert("intel_frustration".to_string(), v.into());
        }
        if let Some(v) = &self.specificity {
            map.insert("intel_specificity".to_string(), v.clone().into());
        }
        if let Some(v) = &self.task_type {
            map.insert("intel_task_type".to_string(), v.clone().into());
        }
        if let Some(v) = self.quality {
            map.insert("intel_quality".to_string(), v.into());
        }
        if let Some(v) = self.iteration {
            map.insert("intel_iteration".to_string(), v.into());
        }
        map
    }
}

/// Parse the first `§` line of an assistant response.
/// Returns `None` when no marker is present or no field validates.
pub fn parse_intel_line(response: &str) -> Option<IntelFields> {
    let line = response
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(INTEL_MARKER))?;

    let fields = parse_fields(line);
    if fields.is_empty() { None } else { Some(fields) }
}

fn parse_fields(line: &str) -> IntelFields {
    let mut fields = IntelFields::default();

    if let Some(captures) = FRUSTRATION_RE.captures(line)
        && let Ok(value) = captures[1].parse::<f64>()
        && (0.0..=1.0).contains(&value)
    {
        fields.frustration = Some(value);
    }

    if let Some(captures) = SPECIFICITY_RE.captures(line) {
        fields.specificity = Some(captures[1].to_string());
    }

    if let Some(captures) = TASK_TYPE_RE.captures(line) {
        fields.task_type = Some(captures[1].to_string());
    }

    if let Some(captures) = QUALITY_RE.captures(line)
        && let Ok(value) = captures[1].parse::<f64>()
        && (0.0..=1.0).contains(&value)
    {
        fields.quality = Some(value);
    }

    // Single digit only: a multi-digit capture means the marker was followed
    // by a number, not an iteration count.
    if let Some(captures) = ITERATION_RE.captures(line)
        && captures[1].len() == 1
        && let Ok(value) = captures[1].parse::<u8>()
        && (1..=9).contains(&value)
    {
        fields.iteration = Some(value);
    }

    fields
}

/// Remove every intel line from text destined for a trace's `output`.
pub fn strip_intel_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with(INTEL_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}
