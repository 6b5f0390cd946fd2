//! Credential table.
//!
//! A comma separated file with one row per user:
//!
//! ```text
//! <password>,<username>,<username>,<group>
//! ```
//!
//! Rows with only a password and username are accepted on read and gain the
//! remaining columns the next time the user is ensured. Fields never contain
//! commas or newlines, so no quoting is needed.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{DepsError, Result};
use crate::fsutil;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    pass: String,
    group: String,
}

/// In-memory view of the credential table.
#[derive(Debug, Default)]
pub struct Passwd {
    names: BTreeMap<String, Entry>,
    changed: bool,
}

impl Passwd {
    /// Read the table at `path`. A missing file yields an empty table.
    pub fn read(path: &Path) -> Result<Self> {
        let mut passwd = Self::default();
        if !path.exists() {
            return Ok(passwd);
        }

        let contents = fsutil::read_to_string(path)?;
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Vec<&str> = line.split(',').collect();
            if record.len() < 2 {
                return Err(DepsError::Passwd {
                    path: path.to_path_buf(),
                    reason: format!(
                        "line {} must have at least 2 columns (password, user), found {}",
                        lineno + 1,
                        record.len()
                    ),
                });
            }
            let group = if record.len() > 3 { record[3] } else { "" };
            passwd.names.insert(
                record[1].to_string(),
                Entry {
                    pass: record[0].to_string(),
                    group: group.to_string(),
                },
            );
        }
        Ok(passwd)
    }

    /// Password of `name`, if present and non-empty.
    pub fn pass(&self, name: &str) -> Option<&str> {
        self.names
            .get(name)
            .map(|e| e.pass.as_str())
            .filter(|p| !p.is_empty())
    }

    pub fn group(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(|e| e.group.as_str())
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Insert or update a user. No change is recorded when the row already
    /// matches.
    pub fn ensure_user(&mut self, name: &str, group: &str, pass: &str) -> Result<()> {
        for (field, value) in [("user", name), ("group", group), ("password", pass)] {
            if value.contains([',', '\n', '\r']) {
                return Err(DepsError::Credential(format!(
                    "{field} for {name:?} may not contain commas or newlines"
                )));
            }
        }

        let entry = Entry {
            pass: pass.to_string(),
            group: group.to_string(),
        };
        if self.names.get(name) == Some(&entry) {
            return Ok(());
        }
        self.names.insert(name.to_string(), entry);
        self.changed = true;
        Ok(())
    }

    /// Whether any row differs from what was read.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Persist the table if it changed. Returns true when written.
    pub fn write(&mut self, path: &Path) -> Result<bool> {
        if !self.changed {
            debug!(path = %path.display(), "Credential table unchanged");
            return Ok(false);
        }

        let mut out = String::new();
        for (name, entry) in &self.names {
            out.push_str(&format!("{},{name},{name},{}\n", entry.pass, entry.group));
        }
        fsutil::atomic_write(path, out.as_bytes())?;
        self.changed = false;
        info!(path = %path.display(), users = self.names.len(), "Wrote credential table");
        Ok(true)
    }

    /// Derive the server entry from an older node-only table.
    ///
    /// Returns true when the migration ran.
    pub fn migrate(&mut self, program: &str) -> Result<bool> {
        if self.pass("server").is_some() {
            return Ok(false);
        }
        let Some(node) = self.pass("node").map(str::to_string) else {
            return Ok(false);
        };
        info!("Migrating node credential to server credential");
        self.ensure_user("server", &format!("{program}:server"), &node)?;
        Ok(true)
    }
}
