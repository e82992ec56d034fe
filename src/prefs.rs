//! Persisted provider preferences.
//!
//! Tracks the engine version code used on the previous run so that a
//! package downgrade can be detected before the data directory is touched:
//! newer engines may have written data an older one cannot read.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Preferences stored in prefs.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Prefs {
    /// Version code used on the previous run (0 if never run)
    #[serde(default)]
    pub last_version_code_used: u32,

    /// RFC 3339 timestamp of the last update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// How the current version relates to the previous run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    FirstRun,
    Unchanged,
    Upgraded { from: u32 },
    Downgraded { from: u32 },
}

impl VersionChange {
    pub fn between(last: u32, current: u32) -> Self {
        if last == 0 {
            VersionChange::FirstRun
        } else if last == current {
            VersionChange::Unchanged
        } else if last > current {
            VersionChange::Downgraded { from: last }
        } else {
            VersionChange::Upgraded { from: last }
        }
    }
}

/// Preference store backed by a JSON file
pub struct PrefsStore {
    prefs_path: PathBuf,
}

impl PrefsStore {
    pub fn new(prefs_path: PathBuf) -> Result<Self> {
        if let Some(parent) = prefs_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create prefs directory: {:?}", parent))?;
        }
        Ok(Self { prefs_path })
    }

    pub fn prefs_path(&self) -> &Path {
        &self.prefs_path
    }

    /// Read prefs from disk
    pub fn read(&self) -> Result<Prefs> {
        if !self.prefs_path.exists() {
            return Ok(Prefs::default());
        }

        let content = std::fs::read_to_string(&self.prefs_path)
            .with_context(|| format!("Failed to read prefs file: {:?}", self.prefs_path))?;

        serde_json::from_str(&content).with_context(|| "Failed to parse prefs JSON")
    }

    /// Write prefs to disk
    pub fn write(&self, prefs: &Prefs) -> Result<()> {
        let content = serde_json::to_string_pretty(prefs).context("Failed to serialize prefs")?;

        std::fs::write(&self.prefs_path, content)
            .with_context(|| format!("Failed to write prefs file: {:?}", self.prefs_path))?;

        debug!("Prefs saved to {:?}", self.prefs_path);
        Ok(())
    }

    /// Delete the prefs file
    pub fn remove(&self) -> Result<()> {
        if self.prefs_path.exists() {
            std::fs::remove_file(&self.prefs_path)
                .with_context(|| format!("Failed to remove prefs file: {:?}", self.prefs_path))?;
        }
        Ok(())
    }

    /// Compare `current` with the last recorded version code, wiping
    /// `data_dir` on a downgrade and recording `current` if it changed.
    ///
    /// An unreadable prefs file is treated as a first run.
    pub fn check_version(&self, current: u32, data_dir: &Path) -> Result<VersionChange> {
        let mut prefs = self.read().unwrap_or_else(|e| {
            warn!("Failed to read prefs, starting fresh: {}", e);
            Prefs::default()
        });

        let change = VersionChange::between(prefs.last_version_code_used, current);

        if let VersionChange::Downgraded { from } = change {
            info!(
                "Engine package downgraded from {} to {}; deleting contents of {:?}",
                from, current, data_dir
            );
            delete_contents(data_dir);
        }

        if change != VersionChange::Unchanged {
            prefs.last_version_code_used = current;
            prefs.updated_at = Some(chrono::Utc::now().to_rfc3339());
            self.write(&prefs)?;
        }

        Ok(change)
    }
}

/// Recursively delete everything inside `dir`, keeping `dir` itself.
///
/// Entries that cannot be deleted are logged and skipped.
pub fn delete_contents(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        let result = if is_dir {
            delete_contents(&path);
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };

        if let Err(e) = result {
            warn!("Failed to delete {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(data_dir: &Path) {
        std::fs::create_dir_all(data_dir.join("cache/nested")).unwrap();
        std::fs::write(data_dir.join("cookies"), "c").unwrap();
        std::fs::write(data_dir.join("cache/nested/blob"), "b").unwrap();
    }

    #[test]
    fn test_version_change_between() {
        assert_eq!(VersionChange::between(0, 5), VersionChange::FirstRun);
        assert_eq!(VersionChange::between(5, 5), VersionChange::Unchanged);
        assert_eq!(
            VersionChange::between(4, 5),
            VersionChange::Upgraded { from: 4 }
        );
        assert_eq!(
            VersionChange::between(6, 5),
            VersionChange::Downgraded { from: 6 }
        );
    }

    #[test]
    fn test_read_nonexistent_prefs() {
        let tmp = tempdir().unwrap();
        let store = PrefsStore::new(tmp.path().join("prefs.json")).unwrap();
        let prefs = store.read().unwrap();
        assert_eq!(prefs.last_version_code_used, 0);
        assert!(prefs.updated_at.is_none());
    }

    #[test]
    fn test_first_run_records_version() {
        let tmp = tempdir().unwrap();
        let store = PrefsStore::new(tmp.path().join("prefs.json")).unwrap();

        let change = store.check_version(3, &tmp.path().join("data")).unwrap();
        assert_eq!(change, VersionChange::FirstRun);

        let prefs = store.read().unwrap();
        assert_eq!(prefs.last_version_code_used, 3);
        assert!(prefs.updated_at.is_some());
    }

    #[test]
    fn test_downgrade_wipes_data_contents() {
        let tmp = tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        populate(&data_dir);

        let store = PrefsStore::new(tmp.path().join("prefs.json")).unwrap();
        store.check_version(10, &data_dir).unwrap();

        let change = store.check_version(7, &data_dir).unwrap();
        assert_eq!(change, VersionChange::Downgraded { from: 10 });

        assert!(data_dir.exists());
        assert_eq!(std::fs::read_dir(&data_dir).unwrap().count(), 0);
        assert_eq!(store.read().unwrap().last_version_code_used, 7);
    }

    #[test]
    fn test_upgrade_keeps_data() {
        let tmp = tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        populate(&data_dir);

        let store = PrefsStore::new(tmp.path().join("prefs.json")).unwrap();
        store.check_version(1, &data_dir).unwrap();

        let change = store.check_version(2, &data_dir).unwrap();
        assert_eq!(change, VersionChange::Upgraded { from: 1 });
        assert!(data_dir.join("cookies").exists());
        assert!(data_dir.join("cache/nested/blob").exists());
        assert_eq!(store.read().unwrap().last_version_code_used, 2);
    }

    #[test]
    fn test_unchanged_version_does_not_rewrite() {
        let tmp = tempdir().unwrap();
        let store = PrefsStore::new(tmp.path().join("prefs.json")).unwrap();
        let data_dir = tmp.path().join("data");

        store.check_version(4, &data_dir).unwrap();
        let before = store.read().unwrap().updated_at;

        assert_eq!(
            store.check_version(4, &data_dir).unwrap(),
            VersionChange::Unchanged
        );
        assert_eq!(store.read().unwrap().updated_at, before);
    }

    #[test]
    fn test_corrupt_prefs_treated_as_first_run() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("prefs.json");
        std::fs::write(&path, "{broken").unwrap();

        let store = PrefsStore::new(path).unwrap();
        let change = store.check_version(2, &tmp.path().join("data")).unwrap();
        assert_eq!(change, VersionChange::FirstRun);
        assert_eq!(store.read().unwrap().last_version_code_used, 2);
    }

    #[test]
    fn test_delete_contents_missing_dir() {
        let tmp = tempdir().unwrap();
        delete_contents(&tmp.path().join("missing"));
    }
}
