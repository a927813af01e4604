//! Instance registry persisted as a single JSON document.
//!
//! Every call loads the whole document, works on it in memory and, for
//! writers, rewrites it atomically (temp file + rename). Readers hold a
//! shared lock and writers an exclusive lock on a sidecar `.lock` file for
//! the duration of that one call, so independent processes (CLI, monitor,
//! chat bridge) never interleave a read-modify-write cycle.
//!
//! A missing or unparseable document reads as an empty registry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::models::instance::{Instance, InstanceStatus, InstanceStoreFile, InstanceUpdate};
use crate::{AppError, Result};

use super::lock::{LockMode, StoreLock};

/// File-backed registry of managed instances.
#[derive(Debug, Clone)]
pub struct InstanceRepo {
    path: PathBuf,
    lock_path: PathBuf,
    default_session: String,
}

impl InstanceRepo {
    /// Create a repository over the document at `path`.
    ///
    /// `default_session` is recorded in a freshly created document.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, default_session: &str) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            default_session: default_session.to_owned(),
        }
    }

    /// Location of the registry document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new record.
    ///
    /// The name check and the write happen under one exclusive lock against
    /// the freshly loaded document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` if another record carries the same
    /// name or id (the document is left untouched), or
    /// `AppError::Persistence` if the write fails.
    pub fn add(&self, instance: &Instance) -> Result<()> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut store = self.load_raw();

        if let Some(ref name) = instance.name {
            if let Some(existing) = store
                .instances
                .values()
                .find(|i| i.name.as_deref() == Some(name.as_str()))
            {
                return Err(AppError::AlreadyExists(format!(
                    "instance named '{name}' already exists (id: {})",
                    existing.id
                )));
            }
        }
        if store.instances.contains_key(&instance.id) {
            return Err(AppError::AlreadyExists(format!(
                "instance id '{}' already registered",
                instance.id
            )));
        }

        store.instances.insert(instance.id.clone(), instance.clone());
        self.save_raw(&store)
    }

    /// Merge `update` into the record with `id` and return the result.
    ///
    /// A `Stopped` record keeps its status: a concurrent reconciliation
    /// that observed the window alive just before it was stopped cannot
    /// revive it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `id` is not registered, or
    /// `AppError::Persistence` if the write fails.
    pub fn update(&self, id: &str, update: &InstanceUpdate) -> Result<Instance> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut store = self.load_raw();

        let record = store
            .instances
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("instance {id} not found")))?;

        let mut update = update.clone();
        if record.status == InstanceStatus::Stopped
            && update.status.is_some_and(|s| s != InstanceStatus::Stopped)
        {
            debug!(instance_id = id, "ignoring status change on stopped instance");
            update.status = None;
        }
        record.apply(&update);
        let updated = record.clone();

        self.save_raw(&store)?;
        Ok(updated)
    }

    /// Delete the record with `id`. Returns `false` if it was absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the write fails.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut store = self.load_raw();
        if store.instances.remove(id).is_none() {
            return Ok(false);
        }
        self.save_raw(&store)?;
        Ok(true)
    }

    /// Exact lookup by short id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn get(&self, id: &str) -> Result<Option<Instance>> {
        self.read(|store| store.instances.get(id).cloned())
    }

    /// Resolve a user-supplied identifier.
    ///
    /// Order: exact id, id prefix, exact name, case-insensitive name
    /// substring. Prefix and substring rules return the oldest match.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn find(&self, identifier: &str) -> Result<Option<Instance>> {
        if identifier.is_empty() {
            return Ok(None);
        }
        self.read(|store| resolve(store, identifier).cloned())
    }

    /// Exact lookup by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Instance>> {
        self.read(|store| {
            store
                .ordered()
                .into_iter()
                .find(|i| i.name.as_deref() == Some(name))
                .cloned()
        })
    }

    /// Lookup by multiplexer pane id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn find_by_pane(&self, pane_ref: &str) -> Result<Option<Instance>> {
        self.read(|store| {
            store
                .ordered()
                .into_iter()
                .find(|i| !i.pane_ref.is_empty() && i.pane_ref == pane_ref)
                .cloned()
        })
    }

    /// All records ordered by creation time, optionally without stopped ones.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn list(&self, include_stopped: bool) -> Result<Vec<Instance>> {
        self.read(|store| {
            store
                .ordered()
                .into_iter()
                .filter(|i| include_stopped || i.status.is_live())
                .cloned()
                .collect()
        })
    }

    /// Multiplexer session recorded in the document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn session_name(&self) -> Result<String> {
        self.read(|store| store.session_name.clone())
    }

    /// Drop every record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the write fails.
    pub fn clear(&self) -> Result<()> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut store = self.load_raw();
        store.instances.clear();
        self.save_raw(&store)
    }

    /// Load the whole document under a shared lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn snapshot(&self) -> Result<InstanceStoreFile> {
        self.read(Clone::clone)
    }

    fn read<T>(&self, f: impl FnOnce(&InstanceStoreFile) -> T) -> Result<T> {
        let _lock = self.lock(LockMode::Shared)?;
        let store = self.load_raw();
        Ok(f(&store))
    }

    fn lock(&self, mode: LockMode) -> Result<StoreLock> {
        StoreLock::acquire(&self.lock_path, mode)
    }

    /// Read the document; caller holds the lock.
    fn load_raw(&self) -> InstanceStoreFile {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return InstanceStoreFile::empty(&self.default_session);
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "registry unreadable, treating as empty");
                return InstanceStoreFile::empty(&self.default_session);
            }
        };

        match serde_json::from_str(&raw) {
            Ok(store) => store,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "registry corrupt, treating as empty");
                InstanceStoreFile::empty(&self.default_session)
            }
        }
    }

    /// Atomically replace the document; caller holds the exclusive lock.
    fn save_raw(&self, store: &InstanceStoreFile) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Persistence(format!("failed to create {}: {err}", parent.display()))
        })?;

        let json = serde_json::to_string_pretty(store)?;
        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::Persistence(format!("failed to stage registry: {err}")))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.write_all(b"\n"))
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| AppError::Persistence(format!("failed to write registry: {err}")))?;
        tmp.persist(&self.path)
            .map_err(|err| AppError::Persistence(format!("failed to replace registry: {err}")))?;
        Ok(())
    }
}

fn resolve<'a>(store: &'a InstanceStoreFile, identifier: &str) -> Option<&'a Instance> {
    if let Some(exact) = store.instances.get(identifier) {
        return Some(exact);
    }

    let ordered = store.ordered();
    if let Some(prefixed) = ordered.iter().copied().find(|i| i.id.starts_with(identifier)) {
        return Some(prefixed);
    }
    if let Some(named) = ordered
        .iter()
        .copied()
        .find(|i| i.name.as_deref() == Some(identifier))
    {
        return Some(named);
    }

    let needle = identifier.to_lowercase();
    ordered
        .into_iter()
        .find(|i| i.name.as_ref().is_some_and(|n| n.to_lowercase().contains(&needle)))
}
