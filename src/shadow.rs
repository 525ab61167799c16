//! Shadow-file transaction isolation
//!
//! Each transaction that touches a table works against a private copy —
//! `<table>.<transaction_id>.shadow.bin` — rather than the original file
//! directly. Commit renames every shadow over its original atomically;
//! rollback (or crash cleanup) just deletes the shadows
//! (`SPEC_FULL.md` §4.3).

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::Result;

/// Tracks the shadow copies created for one transaction and maps table
/// names to their shadow paths.
#[derive(Debug, Default)]
pub struct ShadowSet {
    data_dir: PathBuf,
    transaction_id: String,
    shadows: std::collections::HashMap<String, PathBuf>,
}

impl ShadowSet {
    pub fn new(data_dir: PathBuf, transaction_id: String) -> Self {
        Self {
            data_dir,
            transaction_id,
            shadows: std::collections::HashMap::new(),
        }
    }

    fn original_path(&self, table_name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.bin", table_name))
    }

    fn shadow_path(&self, table_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}.shadow.bin", table_name, self.transaction_id))
    }

    /// Create (if not already created this transaction) a shadow copy of
    /// `table_name` and return its path. If the original does not exist
    /// yet (a `CreateTable` about to run), the shadow path is reserved but
    /// no file is copied — the table operation that follows creates it.
    pub fn create_shadow_for_table(&mut self, table_name: &str) -> Result<PathBuf> {
        if let Some(existing) = self.shadows.get(table_name) {
            return Ok(existing.clone());
        }

        let original = self.original_path(table_name);
        let shadow = self.shadow_path(table_name);
        if original.exists() {
            fs::copy(&original, &shadow)?;
            debug!(
                "shadowed table '{}' for transaction {} at {}",
                table_name,
                self.transaction_id,
                shadow.display()
            );
        }
        self.shadows.insert(table_name.to_string(), shadow.clone());
        Ok(shadow)
    }

    /// The path a storage operation should use for `table_name`: the
    /// shadow if one has been created this transaction, otherwise the
    /// original (read-only access that hasn't been promoted to a write
    /// yet should still go through `create_shadow_for_table` first under
    /// strict two-phase locking, but this getter is also useful for
    /// diagnostics).
    pub fn resolve(&self, table_name: &str) -> PathBuf {
        self.shadows
            .get(table_name)
            .cloned()
            .unwrap_or_else(|| self.original_path(table_name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.shadows.keys().map(|s| s.as_str())
    }

    fn backup_path(&self, table_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}.backup.bin", table_name, self.transaction_id))
    }

    /// Atomically rename every shadow over its original. Best-effort
    /// all-or-nothing at the directory level: before promoting a shadow,
    /// the original (if any) is preserved under a backup path, so that if
    /// a later table in the same commit fails to promote, the tables
    /// already promoted can be restored from their backups. This is a
    /// known limitation, not a true cross-file atomic commit — a crash at
    /// exactly the wrong instant between restoring backups can still leave
    /// mixed state (`SPEC_FULL.md` §9 Q2).
    pub fn commit_shadows(&mut self) -> Result<()> {
        // Tables whose original was moved aside to `backup` (recorded
        // immediately, before the second rename is attempted) so that a
        // failure of that *same* table's shadow->original rename still has
        // something to restore from — not just tables that fully promoted
        // before a later table failed.
        let mut backed_up: Vec<(String, PathBuf)> = Vec::new();
        let mut promoted_count = 0usize;

        let outcome = (|| -> Result<()> {
            for (table_name, shadow_path) in self.shadows.iter() {
                if !shadow_path.exists() {
                    // Nothing was ever written for this name (e.g. created
                    // then dropped within the same transaction).
                    continue;
                }
                let original = self.original_path(table_name);
                let backup = self.backup_path(table_name);
                if original.exists() {
                    fs::rename(&original, &backup)?;
                    backed_up.push((table_name.clone(), backup));
                }
                fs::rename(shadow_path, &original)?;
                promoted_count += 1;
            }
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                for (_, backup) in &backed_up {
                    if backup.exists() {
                        let _ = fs::remove_file(backup);
                    }
                }
                self.shadows.clear();
                Ok(())
            }
            Err(e) => {
                warn!(
                    "commit failed after {} of {} tables promoted, restoring backups: {}",
                    promoted_count,
                    self.shadows.len(),
                    e
                );
                for (table_name, backup) in backed_up.iter().rev() {
                    let original = self.original_path(table_name);
                    if backup.exists() {
                        if let Err(restore_err) = fs::rename(backup, &original) {
                            warn!(
                                "failed to restore table '{}' after partial commit: {}",
                                table_name, restore_err
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete every remaining shadow file. Called on rollback, and as a
    /// best-effort sweep over leftover shadows from a prior crash.
    pub fn cleanup_shadows(&mut self) {
        for (table_name, shadow_path) in self.shadows.drain() {
            if shadow_path.exists() {
                if let Err(e) = fs::remove_file(&shadow_path) {
                    warn!(
                        "failed to remove shadow for table '{}': {}",
                        table_name, e
                    );
                }
            }
        }
    }
}

/// Sweep `data_dir` for shadow files left behind by a process that crashed
/// mid-transaction, deleting any `*.shadow.bin` file found. Safe to call on
/// startup: a crash before commit leaves stale shadows, never a stale
/// original, so removing every shadow found cannot lose committed data.
pub fn sweep_orphaned_shadows(data_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    if !data_dir.exists() {
        return Ok(0);
    }
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".shadow.bin") {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!("swept {} orphaned shadow file(s) from {}", removed, data_dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_shadow_copies_existing_table() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("t.bin");
        fs::write(&original, b"original bytes").unwrap();

        let mut shadows = ShadowSet::new(dir.path().to_path_buf(), "tx1".to_string());
        let shadow_path = shadows.create_shadow_for_table("t").unwrap();

        assert!(shadow_path.exists());
        assert_eq!(fs::read(&shadow_path).unwrap(), b"original bytes");
    }

    #[test]
    fn create_shadow_for_nonexistent_table_reserves_path_without_copying() {
        let dir = tempdir().unwrap();
        let mut shadows = ShadowSet::new(dir.path().to_path_buf(), "tx1".to_string());
        let shadow_path = shadows.create_shadow_for_table("brand_new").unwrap();
        assert!(!shadow_path.exists());
    }

    #[test]
    fn commit_shadows_renames_over_originals() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("t.bin");
        fs::write(&original, b"old").unwrap();

        let mut shadows = ShadowSet::new(dir.path().to_path_buf(), "tx1".to_string());
        let shadow_path = shadows.create_shadow_for_table("t").unwrap();
        fs::write(&shadow_path, b"new").unwrap();

        shadows.commit_shadows().unwrap();

        assert!(!shadow_path.exists());
        assert_eq!(fs::read(&original).unwrap(), b"new");
    }

    #[test]
    fn commit_failure_on_one_table_restores_already_promoted_originals() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"a-old").unwrap();
        fs::write(dir.path().join("b.bin"), b"b-old").unwrap();

        let mut shadows = ShadowSet::new(dir.path().to_path_buf(), "tx1".to_string());
        let shadow_a = shadows.create_shadow_for_table("a").unwrap();
        fs::write(&shadow_a, b"a-new").unwrap();
        let shadow_b = shadows.create_shadow_for_table("b").unwrap();
        fs::write(&shadow_b, b"b-new").unwrap();

        // Block table b's backup step by occupying its backup path with a
        // non-empty directory, so its rename fails after a's rename has
        // already succeeded.
        let backup_b = dir.path().join("b.tx1.backup.bin");
        fs::create_dir(&backup_b).unwrap();
        fs::write(backup_b.join("occupied"), b"x").unwrap();

        assert!(shadows.commit_shadows().is_err());

        assert_eq!(fs::read(dir.path().join("a.bin")).unwrap(), b"a-old");
        assert_eq!(fs::read(dir.path().join("b.bin")).unwrap(), b"b-old");
    }

    #[test]
    fn cleanup_shadows_removes_without_touching_original() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("t.bin");
        fs::write(&original, b"old").unwrap();

        let mut shadows = ShadowSet::new(dir.path().to_path_buf(), "tx1".to_string());
        let shadow_path = shadows.create_shadow_for_table("t").unwrap();
        fs::write(&shadow_path, b"discarded").unwrap();

        shadows.cleanup_shadows();

        assert!(!shadow_path.exists());
        assert_eq!(fs::read(&original).unwrap(), b"old");
    }

    #[test]
    fn sweep_orphaned_shadows_removes_leftover_files_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("t.bin"), b"data").unwrap();
        fs::write(dir.path().join("t.tx1.shadow.bin"), b"stale").unwrap();

        let removed = sweep_orphaned_shadows(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("t.bin").exists());
        assert!(!dir.path().join("t.tx1.shadow.bin").exists());
    }
}
