use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

/// Secret provenance: declared inline or read from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Text,
    File,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Text => "text",
            SecretKind::File => "file",
        }
    }

    pub fn parse(raw: &str) -> Option<SecretKind> {
        match raw {
            "text" => Some(SecretKind::Text),
            "file" => Some(SecretKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub id: i64,
    pub kind: String,
    pub value: String,
    pub created_at: i64,
}

/// CRUD over the masked-value store.
///
/// Duplicate `create` calls under the same `(type, value)` return the
/// existing id; the unique index makes this hold across racing hooks too.
pub struct SecretsVault {
    conn: Connection,
    path: PathBuf,
}

impl SecretsVault {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let existed = db_path.exists();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open secrets db: {}", db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_secrets_type ON secrets(type);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_secrets_identity ON secrets(type, value);
            "#,
        )?;

        if !existed {
            restrict_permissions(db_path)?;
        }

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a secret; returns the existing id when the value is already known.
    pub fn create(&self, kind: SecretKind, value: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO secrets (type, value) VALUES (?1, ?2)",
            params![kind.as_str(), value],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM secrets WHERE type = ?1 AND value = ?2",
            params![kind.as_str(), value],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    pub fn list(&self) -> Result<Vec<SecretRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, type, value, created_at FROM secrets ORDER BY id")?;

        let records = stmt
            .query_map([], |row| {
                Ok(SecretRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    value: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    /// Raw values only, for pattern building.
    pub fn values(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM secrets")?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }

    pub fn remove(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM secrets WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn clear_all(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM secrets", [])?)
    }

    /// Remove duplicate rows predating the unique index, keeping the lowest id.
    pub fn dedupe(&self) -> Result<usize> {
        Ok(self.conn.execute(
            r#"
            DELETE FROM secrets
            WHERE id NOT IN (
                SELECT MIN(id) FROM secrets GROUP BY type, value
            )
            "#,
            [],
        )?)
    }

    pub fn find(&self, kind: SecretKind, value: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM secrets WHERE type = ?1 AND value = ?2",
                params![kind.as_str(), value],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_vault(dir: &tempfile::TempDir) -> SecretsVault {
        SecretsVault::open(&dir.path().join("secrets.db")).unwrap()
    }

    #[test]
    fn test_create_is_idempotent_per_type_and_value() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);

        let first = vault.create(SecretKind::Text, "sk-test-abc").unwrap();
        let second = vault.create(SecretKind::Text, "sk-test-abc").unwrap();
        let third = vault.create(SecretKind::Text, "sk-test-abc").unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(vault.list().unwrap().len(), 1);

        // Same value under a different type is a distinct secret.
        let as_file = vault.create(SecretKind::File, "sk-test-abc").unwrap();
        assert_ne!(first, as_file);
        assert_eq!(vault.list().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);

        let id = vault.create(SecretKind::Text, "one").unwrap();
        vault.create(SecretKind::Text, "two").unwrap();

        assert!(vault.remove(id).unwrap());
        assert!(!vault.remove(id).unwrap());
        assert_eq!(vault.clear_all().unwrap(), 1);
        assert!(vault.values().unwrap().is_empty());
    }

    #[test]
    fn test_dedupe_keeps_lowest_id() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);

        // Simulate legacy rows that predate the unique index.
        vault.conn.execute("DROP INDEX idx_secrets_identity", []).unwrap();
        for _ in 0..3 {
            vault
                .conn
                .execute(
                    "INSERT INTO secrets (type, value) VALUES ('text', 'dup')",
                    [],
                )
                .unwrap();
        }

        assert_eq!(vault.dedupe().unwrap(), 2);
        let records = vault.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_vault_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.db");
        let vault = SecretsVault::open(&path).unwrap();
        vault.create(SecretKind::Text, "s").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
