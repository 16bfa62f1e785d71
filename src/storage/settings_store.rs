//! Settings store
//!
//! Three files under the user directory: `settings.yaml` (current),
//! `settings-pending.yaml` (pending) and `backup/settings-<timestamp>.yaml`.
//! Files are never rewritten in place; every write lands in a temporary file
//! that is renamed over the target.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::traits::ModuleError;
use crate::settings::{ConfigInstance, ConfigMetadata, HyperdriveSettings};
use crate::utils::fs::{
    copy_file, ensure_dir, rename, write_file, RenameKind, DIR_MODE, FILE_MODE,
};
use crate::utils::time::backup_timestamp;

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const PENDING_SETTINGS_FILE: &str = "settings-pending.yaml";
pub const BACKUP_DIR: &str = "backup";

/// Directories created under the user directory on first save
pub const USER_SUBDIRS: [&str; 6] = ["backup", "logs", "secrets", "override", "runtime", "metrics"];

/// Result of `commit_pending`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// A pending file existed and is now current
    pub committed: bool,
    /// Copy of the previous current file
    pub backup: Option<PathBuf>,
    /// Pending replaced current with a same-filesystem rename
    pub atomic: bool,
}

/// Owner of the settings files
#[derive(Debug, Clone)]
pub struct SettingsStore {
    user_dir: PathBuf,
}

fn write_error(path: &Path, err: ModuleError) -> ModuleError {
    match err {
        ModuleError::PermissionDenied { .. } => err,
        other => ModuleError::SettingsWriteError {
            path: path.display().to_string(),
            reason: other.to_string(),
        },
    }
}

fn commit_error(err: ModuleError) -> ModuleError {
    match err {
        ModuleError::PermissionDenied { .. } => err,
        other => ModuleError::AtomicCommitFailed(other.to_string()),
    }
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(user_dir: P) -> Self {
        Self {
            user_dir: user_dir.as_ref().to_path_buf(),
        }
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.user_dir.join(SETTINGS_FILE)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.user_dir.join(PENDING_SETTINGS_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.user_dir.join(BACKUP_DIR)
    }

    pub fn has_pending(&self) -> bool {
        self.pending_path().is_file()
    }

    /// Load the current settings; `defaults` builds a fresh document when
    /// the file does not exist (the flag is then `true`)
    pub fn load_current<F>(&self, defaults: F) -> Result<(HyperdriveSettings, bool), ModuleError>
    where
        F: FnOnce() -> HyperdriveSettings,
    {
        load_file(&self.current_path(), defaults)
    }

    /// Load the pending settings, like `load_current`
    pub fn load_pending<F>(&self, defaults: F) -> Result<(HyperdriveSettings, bool), ModuleError>
    where
        F: FnOnce() -> HyperdriveSettings,
    {
        load_file(&self.pending_path(), defaults)
    }

    /// Literal defaults for one module's metadata
    pub fn create_defaults(metadata: &ConfigMetadata) -> ConfigInstance {
        ConfigInstance::create_defaults(metadata)
    }

    /// Create the user directory layout
    pub fn ensure_layout(&self) -> Result<(), ModuleError> {
        ensure_dir(&self.user_dir, DIR_MODE)?;
        for sub in USER_SUBDIRS {
            ensure_dir(&self.user_dir.join(sub), DIR_MODE)?;
        }
        Ok(())
    }

    /// Write the pending settings file
    pub fn save_pending(&self, settings: &HyperdriveSettings) -> Result<(), ModuleError> {
        self.ensure_layout()?;
        let path = self.pending_path();
        let yaml = serde_yaml::to_string(settings).map_err(|e| ModuleError::SettingsWriteError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let staging = self.user_dir.join(format!(".{}.tmp", PENDING_SETTINGS_FILE));
        write_file(&staging, yaml.as_bytes(), FILE_MODE).map_err(|e| write_error(&path, e))?;
        rename(&staging, &path).map_err(|e| write_error(&path, e))?;
        debug!("Saved pending settings to {:?}", path);
        Ok(())
    }

    /// Discard pending changes
    pub fn delete_pending(&self) -> Result<(), ModuleError> {
        let path = self.pending_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ModuleError::io(&path, "Failed to remove pending settings", e)),
        }
    }

    /// Promote pending to current, optionally backing up the old current
    pub fn commit_pending(&self, backup_old: bool) -> Result<CommitOutcome, ModuleError> {
        self.commit_pending_at(backup_old, Local::now())
    }

    /// `commit_pending` with an explicit backup timestamp
    pub fn commit_pending_at(
        &self,
        backup_old: bool,
        now: DateTime<Local>,
    ) -> Result<CommitOutcome, ModuleError> {
        let pending = self.pending_path();
        if !pending.is_file() {
            debug!("No pending settings to commit");
            return Ok(CommitOutcome::default());
        }

        let mut outcome = CommitOutcome {
            committed: false,
            backup: None,
            atomic: true,
        };
        if backup_old {
            outcome.backup = self.backup_current(now)?;
        }

        let current = self.current_path();
        if self.promote_pending()? == RenameKind::CopiedAcrossDevices {
            outcome.atomic = false;
        }
        if !outcome.atomic {
            warn!("Settings commit was not atomic");
        }
        outcome.committed = true;
        info!("Committed pending settings to {:?}", current);
        Ok(outcome)
    }

    /// Copy the current file into the backup directory; current stays in
    /// place until pending is renamed over it
    fn backup_current(&self, now: DateTime<Local>) -> Result<Option<PathBuf>, ModuleError> {
        let current = self.current_path();
        if !current.is_file() {
            return Ok(None);
        }
        ensure_dir(&self.backup_dir(), DIR_MODE).map_err(commit_error)?;
        let backup = self.next_backup_path(now);
        copy_file(&current, &backup, FILE_MODE).map_err(commit_error)?;
        info!("Backed up settings to {:?}", backup);
        Ok(Some(backup))
    }

    fn promote_pending(&self) -> Result<RenameKind, ModuleError> {
        rename(&self.pending_path(), &self.current_path()).map_err(commit_error)
    }

    /// Backup path for `now`, suffixed `_01`, `_02`, ... on collision so that
    /// names stay lexicographically ordered by time
    fn next_backup_path(&self, now: DateTime<Local>) -> PathBuf {
        let stamp = backup_timestamp(now);
        let dir = self.backup_dir();
        let base = dir.join(format!("settings-{}.yaml", stamp));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|n| dir.join(format!("settings-{}_{:02}.yaml", stamp, n)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }

    /// Backup files, oldest first
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, ModuleError> {
        let dir = self.backup_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        let entries =
            std::fs::read_dir(&dir).map_err(|e| ModuleError::io(&dir, "Failed to list backups", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ModuleError::io(&dir, "Failed to list backups", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("settings-") && name.ends_with(".yaml") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }
}

fn load_file<F>(path: &Path, defaults: F) -> Result<(HyperdriveSettings, bool), ModuleError>
where
    F: FnOnce() -> HyperdriveSettings,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Settings file {:?} not found, using defaults", path);
            return Ok((defaults(), true));
        }
        Err(e) => return Err(ModuleError::io(path, "Failed to read settings", e)),
    };
    let settings = serde_yaml::from_str(&contents).map_err(|e| ModuleError::SettingsParseError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok((settings, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HyperdriveConfig;
    use crate::settings::SettingsFactory;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fresh(user: &Path) -> HyperdriveSettings {
        SettingsFactory::new(&HyperdriveConfig::with_dirs("/sys", user)).create(&[])
    }

    #[test]
    fn test_missing_files_are_new() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path());
        let (_, is_new) = store.load_current(|| fresh(temp.path())).unwrap();
        assert!(is_new);
        let (_, is_new) = store.load_pending(|| fresh(temp.path())).unwrap();
        assert!(is_new);
    }

    #[test]
    fn test_save_pending_creates_layout() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user");
        let store = SettingsStore::new(&user);
        store.save_pending(&fresh(&user)).unwrap();
        for sub in USER_SUBDIRS {
            assert!(user.join(sub).is_dir(), "{} missing", sub);
        }
        assert!(store.has_pending());
        let (loaded, is_new) = store.load_pending(|| unreachable!()).unwrap();
        assert!(!is_new);
        assert_eq!(loaded, fresh(&user));
    }

    #[test]
    fn test_commit_without_pending_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path());
        assert_eq!(store.commit_pending(true).unwrap(), CommitOutcome::default());
    }

    #[test]
    fn test_commit_moves_and_backs_up() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path());
        let mut settings = fresh(temp.path());

        store.save_pending(&settings).unwrap();
        let first = store.commit_pending(true).unwrap();
        assert!(first.committed);
        assert!(first.backup.is_none());
        assert!(!store.has_pending());

        settings.project_name = "hd2".to_string();
        store.save_pending(&settings).unwrap();
        let now = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let second = store.commit_pending_at(true, now).unwrap();
        assert_eq!(
            second.backup,
            Some(store.backup_dir().join("settings-2026-01-02_03-04-05.yaml"))
        );

        store.save_pending(&settings).unwrap();
        let third = store.commit_pending_at(true, now).unwrap();
        assert_eq!(
            third.backup,
            Some(store.backup_dir().join("settings-2026-01-02_03-04-05_01.yaml"))
        );

        let (current, _) = store.load_current(|| unreachable!()).unwrap();
        assert_eq!(current.project_name, "hd2");
        assert_eq!(store.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_promotion_keeps_current() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path());
        let mut settings = fresh(temp.path());
        store.save_pending(&settings).unwrap();
        store.commit_pending(true).unwrap();

        settings.project_name = "hd2".to_string();
        store.save_pending(&settings).unwrap();
        let now = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let backup = store.backup_current(now).unwrap().unwrap();
        std::fs::remove_file(store.pending_path()).unwrap();
        assert!(matches!(
            store.promote_pending(),
            Err(ModuleError::AtomicCommitFailed(_))
        ));

        let (current, is_new) = store.load_current(|| unreachable!()).unwrap();
        assert!(!is_new);
        assert_eq!(current.project_name, fresh(temp.path()).project_name);
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            std::fs::read_to_string(store.current_path()).unwrap()
        );
    }

    #[test]
    fn test_parse_error() {
        let temp = TempDir::new().unwrap();
        let store = SettingsStore::new(temp.path());
        std::fs::write(store.current_path(), "version: [unclosed").unwrap();
        assert!(matches!(
            store.load_current(|| unreachable!()),
            Err(ModuleError::SettingsParseError { .. })
        ));
    }
}
