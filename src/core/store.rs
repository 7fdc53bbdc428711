//! Store handle for Switchyard's on-disk state.
//!
//! Every persistent artifact lives under one root directory so a whole
//! deployment can be moved, backed up or thrown away as a unit.

use crate::core::error::SwitchyardError;
use crate::core::schemas;
use std::fs;
use std::path::{Path, PathBuf};

/// Store handle representing one Switchyard state directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute or caller-relative path to the store root directory
    pub root: PathBuf,
}

impl Store {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SwitchyardError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join(schemas::DOCUMENTS_DIR_NAME))?;
        Ok(Self { root })
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(schemas::CONFIG_FILE_NAME)
    }

    pub fn registry_db_path(&self) -> PathBuf {
        self.root.join(schemas::REGISTRY_DB_NAME)
    }

    pub fn weights_db_path(&self) -> PathBuf {
        self.root.join(schemas::WEIGHTS_DB_NAME)
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.root.join(schemas::INDEX_DB_NAME)
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.root.join(schemas::DOCUMENTS_DIR_NAME)
    }

    pub fn governance_log_path(&self) -> PathBuf {
        self.root.join(schemas::GOVERNANCE_EVENTS_NAME)
    }

    pub fn intent_journal_path(&self) -> PathBuf {
        self.root.join(schemas::INTENT_JOURNAL_NAME)
    }

    pub fn broker_log_path(&self) -> PathBuf {
        self.root.join(schemas::BROKER_EVENTS_NAME)
    }
}
