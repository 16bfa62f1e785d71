//! Persistent settings storage
//!
//! The lifecycle coordinator is the only writer of these files.

pub mod settings_store;

pub use settings_store::{
    CommitOutcome, SettingsStore, BACKUP_DIR, PENDING_SETTINGS_FILE, SETTINGS_FILE, USER_SUBDIRS,
};
