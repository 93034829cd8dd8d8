use std::path::Path;
use std::process::Command;

use serde_json::{Map, Value};

/// Project metadata attached to every turn trace.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub project_path: String,
    pub project_name: String,
    pub git_remote: Option<String>,
    pub git_branch: Option<String>,
}

impl ProjectContext {
    /// Gather context from the working directory. Git lookups are best-effort;
    /// a non-repo just yields `None` fields.
    pub fn gather(cwd: &Path) -> ProjectContext {
        ProjectContext {
            project_path: cwd.to_string_lossy().into_owned(),
            project_name: cwd
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            git_remote: git_output(cwd, &["config", "--get", "remote.origin.url"]),
            git_branch: git_output(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]),
        }
    }

    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("project_path".to_string(), self.project_path.clone().into());
        map.insert("project_name".to_string(), self.project_name.clone().into());
        map.insert(
            "git_remote".to_string(),
            self.git_remote.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "git_branch".to_string(),
            self.git_branch.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map
    }
}

fn git_output(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_repo_directory_has_no_git_fields() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProjectContext::gather(dir.path());

        assert_eq!(
            context.project_name,
            dir.path().file_name().unwrap().to_string_lossy()
        );
        assert!(context.git_remote.is_none());

        let metadata = context.metadata();
        assert!(metadata.contains_key("project_path"));
        assert!(metadata.contains_key("git_remote"));
    }
}
