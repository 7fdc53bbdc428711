//! Authoritative document store.
//!
//! Documents are named text blobs addressed by a normalised, `/`-separated
//! key. The filesystem implementation maps keys onto files under the
//! store's `documents/` directory.

use crate::core::error::SwitchyardError;
use crate::core::store::Store;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub trait DocumentStore {
    fn read(&self, key: &str) -> Result<Option<String>, SwitchyardError>;
    fn write(&self, key: &str, text: &str) -> Result<(), SwitchyardError>;
    /// Keys of every document under `folder`, recursively, sorted. An empty
    /// folder (or `.`) means the whole store.
    fn list(&self, folder: &str) -> Result<Vec<String>, SwitchyardError>;
}

/// Normalises a caller-supplied path into a document key.
///
/// `\` becomes `/`, leading `./` and `/` are stripped, spaces become `_`.
/// Empty keys and keys that climb out of the store (`..`) are rejected.
pub fn normalize_key(path: &str) -> Result<String, SwitchyardError> {
    let unified = path.trim().replace('\\', "/").replace(' ', "_");
    let parts: Vec<&str> = unified
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();

    if parts.is_empty() {
        return Err(SwitchyardError::ValidationError(format!(
            "document key '{}' is empty",
            path
        )));
    }
    if parts.iter().any(|p| *p == "..") {
        return Err(SwitchyardError::ValidationError(format!(
            "document key '{}' escapes the store",
            path
        )));
    }
    Ok(parts.join("/"))
}

pub struct FsDocumentStore {
    root: PathBuf,
    extension: String,
}

impl FsDocumentStore {
    pub fn open(store: &Store, extension: &str) -> Result<Self, SwitchyardError> {
        let root = store.documents_dir();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, SwitchyardError> {
        let key = normalize_key(key)?;
        let path = self.root.join(&key);
        // normalize_key already refuses `..`; keep the check close to the I/O.
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(SwitchyardError::ValidationError(format!(
                "document key '{}' escapes the store",
                key
            )));
        }
        Ok(path)
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), SwitchyardError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, key: &str) -> Result<Option<String>, SwitchyardError> {
        let path = self.resolve(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                tracing::warn!(key, "document is not valid UTF-8; treating as absent");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes through a sibling temp file and a rename, so a reader never
    /// sees a half-written document.
    fn write(&self, key: &str, text: &str) -> Result<(), SwitchyardError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        if let Err(e) = fs::write(&tmp, text).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(key, bytes = text.len(), "document written");
        Ok(())
    }

    fn list(&self, folder: &str) -> Result<Vec<String>, SwitchyardError> {
        let dir = match folder.trim().trim_matches('/') {
            "" | "." => self.root.clone(),
            _ => self.resolve(folder)?,
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        self.collect(&dir, &mut keys)?;
        keys.sort();
        Ok(keys)
    }
}
