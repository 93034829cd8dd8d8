use pacetrace_types::BlockageCategory;

/// Outcome of intent/clean-code validation for a proposed edit.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub approved: bool,
    pub feedback: String,
    pub tdd_failure: bool,
    pub clean_code_failure: bool,
}

impl Verdict {
    pub fn approved() -> Self {
        Self {
            approved: true,
            feedback: String::new(),
            tdd_failure: false,
            clean_code_failure: false,
        }
    }
}

/// External collaborator judging whether declared intent matches proposed
/// code. The core only wires its verdict to blockage telemetry and the
/// pre-tool-use exit code.
pub trait IntentValidator {
    fn validate(&self, messages: &[String], code: &str, file_path: &str, tool_name: &str)
    -> Verdict;
}

/// Default validator: approves everything.
pub struct ApproveAll;

impl IntentValidator for ApproveAll {
    fn validate(&self, _: &[String], _: &str, _: &str, _: &str) -> Verdict {
        Verdict::approved()
    }
}

/// Map verdict flags to the blockage category recorded for a rejection.
pub fn blockage_category_for(verdict: &Verdict) -> BlockageCategory {
    if verdict.tdd_failure {
        BlockageCategory::IntentValidationTdd
    } else if verdict.clean_code_failure {
        BlockageCategory::IntentValidationCleancode
    } else {
        BlockageCategory::IntentValidation
    }
}

/// Extensions treated as source code for validation purposes.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "rb", "php", "swift", "scala", "sh", "bash", "pl", "lua", "sql",
];

pub fn is_source_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
