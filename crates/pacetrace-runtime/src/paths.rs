use std::path::PathBuf;

use anyhow::{Context, Result};

/// Well-known locations under the sidecar's config directory.
///
/// Resolution order: `PACETRACE_HOME` (tests and unusual installs), then
/// `~/.pacetrace`.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self> {
        if let Some(root) = std::env::var_os("PACETRACE_HOME") {
            return Ok(Self { root: PathBuf::from(root) });
        }

        let home = dirs::home_dir().context("no home directory")?;
        Ok(Self {
            root: home.join(".pacetrace"),
        })
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Shared telemetry database (snapshots, decisions, blockages, metrics).
    pub fn db_file(&self) -> PathBuf {
        self.root.join("telemetry.db")
    }

    /// Secrets vault; created with mode 0600.
    pub fn secrets_db_file(&self) -> PathBuf {
        self.root.join("secrets.db")
    }

    /// Process-wide hook state.
    pub fn hook_state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Per-session export state, isolated from the rest of the tree.
    pub fn export_state_dir(&self) -> PathBuf {
        self.root.join("export_state")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.clone()
    }

    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_root() {
        let paths = Paths::at(PathBuf::from("/tmp/pt-test"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/pt-test/config.toml"));
        assert_eq!(paths.db_file(), PathBuf::from("/tmp/pt-test/telemetry.db"));
        assert_eq!(
            paths.export_state_dir(),
            PathBuf::from("/tmp/pt-test/export_state")
        );
    }
}
