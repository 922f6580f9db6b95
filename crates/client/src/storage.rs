//! File-backed slot store.
//!
//! All slots live in one JSON object keyed by slot name. Every write replaces
//! the file through a temporary sibling and a rename, so a crash mid-write
//! leaves either the old or the new contents. The temporary file is created
//! owner-only, and the rename keeps that mode.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tempfile::NamedTempFile;

use roadlink_core::{SlotEntry, SlotError, SlotStore};

type Slots = HashMap<String, SlotEntry>;

#[derive(Debug)]
pub struct FileSlotStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileSlotStore {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// Parent directories are created; the file itself is written lazily.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SlotError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SlotError::Io(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, SlotError> {
        self.lock.lock().map_err(|_| SlotError::Poisoned)
    }

    fn load(&self) -> Result<Slots, SlotError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Slots::new()),
            Err(e) => {
                return Err(SlotError::Io(format!("failed to read {}: {e}", self.path.display())));
            }
        };

        if raw.trim().is_empty() {
            return Ok(Slots::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| SlotError::Encoding(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, slots: &Slots) -> Result<(), SlotError> {
        let encoded =
            serde_json::to_vec_pretty(slots).map_err(|e| SlotError::Encoding(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| SlotError::Io(format!("failed to create temp file in {}: {e}", dir.display())))?;
        tmp.write_all(&encoded)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SlotError::Io(format!("failed to write slots: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| SlotError::Io(format!("failed to replace {}: {}", self.path.display(), e.error)))?;
        Ok(())
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> Result<Option<String>, SlotError> {
        let _guard = self.guard()?;
        let mut slots = self.load()?;

        match slots.get(key) {
            Some(entry) if entry.is_expired(Utc::now()) => {
                slots.remove(key);
                if let Err(err) = self.save(&slots) {
                    tracing::warn!(slot = key, "failed to prune expired slot: {err}");
                }
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, max_age: Option<Duration>) -> Result<(), SlotError> {
        let _guard = self.guard()?;
        let mut slots = self.load()?;
        slots.insert(key.to_string(), SlotEntry::new(value, max_age, Utc::now()));
        self.save(&slots)
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        let _guard = self.guard()?;
        let mut slots = self.load()?;
        if slots.remove(key).is_none() {
            return Ok(());
        }
        self.save(&slots)
    }
}
