//! File-backed, multi-process-safe membership cache.
//!
//! The plugin runs once per SSH login, so many short-lived processes share
//! one cache file. Access is serialized twice: a mutex inside the process and
//! an advisory lock on `<cache>.filelock` across processes. The file lock
//! only spans load/merge/save, never the directory call. Saves always reload
//! and merge first, then publish through a temp file and an atomic rename.

use super::store::{Group, Store};
use crate::config::CacheSettings;
use crate::directory::{GroupMembersFetcher, Member, sort_by_email};
use crate::error::PluginError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fd_lock::RwLock;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Suffix of the sibling file used for cross-process locking.
pub const LOCK_SUFFIX: &str = ".filelock";

/// Membership cache in front of an upstream fetcher.
pub struct CacheEngine {
    customer_id: String,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    fetcher: Arc<dyn GroupMembersFetcher>,
    path: PathBuf,
    lock_path: PathBuf,
    /// `None` until the first lookup loads the file.
    store: Mutex<Option<Store>>,
}

impl CacheEngine {
    /// Creates an engine whose notion of "now" is the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL cannot be represented as a time delta.
    pub fn new(
        settings: &CacheSettings,
        customer_id: impl Into<String>,
        fetcher: Arc<dyn GroupMembersFetcher>,
    ) -> Result<Self, PluginError> {
        Self::at(settings, customer_id, fetcher, Utc::now())
    }

    /// Creates an engine with an explicit "now"; entries fetched before
    /// `now - ttl` are treated as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL cannot be represented as a time delta.
    pub fn at(
        settings: &CacheSettings,
        customer_id: impl Into<String>,
        fetcher: Arc<dyn GroupMembersFetcher>,
        now: DateTime<Utc>,
    ) -> Result<Self, PluginError> {
        let deadline = TimeDelta::from_std(settings.ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .ok_or_else(|| crate::config::ConfigError::InvalidDuration {
                field: "cache.duration".to_string(),
                reason: format!("{:?} is out of range", settings.ttl),
            })?;

        Ok(Self {
            customer_id: customer_id.into(),
            now,
            deadline,
            fetcher,
            path: settings.path.clone(),
            lock_path: lock_path_for(&settings.path),
            store: Mutex::new(None),
        })
    }

    /// Returns the members of a group, from the cache when fresh, otherwise
    /// from the upstream fetcher (persisting the result before returning).
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error on a miss, or a cache write error if the
    /// fetched snapshot cannot be persisted.
    #[instrument(skip(self), fields(customer = %self.customer_id))]
    pub async fn group_members(&self, group_email: &str) -> Result<Vec<Member>, PluginError> {
        if let Some(members) = self.cached(group_email) {
            debug!(group = %group_email, members_count = members.len(), "cache hit");
            return Ok(members);
        }

        debug!(group = %group_email, deadline = %self.deadline, "cache miss");
        let mut members = self.fetcher.group_members(group_email).await?;
        self.store_fetched(group_email, &members)?;
        sort_by_email(&mut members);
        Ok(members)
    }

    fn cached(&self, group_email: &str) -> Option<Vec<Member>> {
        let mut guard = self.store.lock();
        let store = guard.get_or_insert_with(|| {
            let mut store = Store::default();
            let disk = self
                .with_file_lock(|| self.read_disk())
                .unwrap_or_else(|err| {
                    warn!(error = %err, "reading cache without cross-process lock");
                    self.read_disk()
                });
            if let Some(disk) = disk {
                store.merge(&disk);
            }
            store
        });

        store
            .get_group(&self.customer_id, self.deadline, group_email)
            .map(Group::sorted_members)
    }

    fn store_fetched(&self, group_email: &str, members: &[Member]) -> Result<(), PluginError> {
        let mut guard = self.store.lock();
        let store = guard.get_or_insert_with(Store::default);

        self.with_file_lock(|| {
            if let Some(disk) = self.read_disk() {
                store.merge(&disk);
            }

            let mut entry = store.add_or_get_group(&self.customer_id, self.now, group_email);
            if !entry.is_live() {
                debug!(
                    group = %group_email,
                    stored_at = %entry.fetched_at(),
                    "cache already holds a fresher snapshot"
                );
            }
            for member in members {
                entry.add_member(member.clone());
            }
            drop(entry);

            self.save(store)
        })?
    }

    /// Runs `f` while holding the exclusive cross-process lock.
    fn with_file_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T, PluginError> {
        let lock_error = |source| PluginError::CacheLock {
            path: self.lock_path.clone(),
            source,
        };

        if let Some(parent) = non_empty_parent(&self.lock_path) {
            fs::create_dir_all(parent).map_err(lock_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(lock_error)?;

        let mut lock = RwLock::new(file);
        let _guard = lock.write().map_err(lock_error)?;
        Ok(f())
    }

    /// Reads the cache file; `None` when absent or unusable.
    fn read_disk(&self) -> Option<Store> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "cache file does not exist");
                return None;
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "failed to read cache file");
                return None;
            }
        };

        match serde_json::from_slice::<Store>(&raw) {
            Ok(store) => {
                debug!(path = %self.path.display(), "cache loaded");
                Some(store)
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "failed to parse cache file");
                None
            }
        }
    }

    /// Publishes the store with write-to-temp-then-rename.
    fn save(&self, store: &Store) -> Result<(), PluginError> {
        let raw = serde_json::to_vec_pretty(store)?;

        let parent = non_empty_parent(&self.path).unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|e| PluginError::cache_write("create directory for", parent, e))?;

        let mut prefix = self.path.file_name().map_or_else(OsString::new, OsString::from);
        prefix.push(".");
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(parent)
            .map_err(|e| PluginError::cache_write("create temporary", parent, e))?;

        temp.write_all(&raw)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| PluginError::cache_write("write temporary", temp.path(), e))?;

        // The temporary file is removed when the handle is dropped on failure.
        temp.persist(&self.path).map_err(|e| {
            let from = e.file.path().to_path_buf();
            PluginError::cache_write("rename temporary", from, e.error)
        })?;

        info!(path = %self.path.display(), "cache saved");
        Ok(())
    }
}

#[async_trait]
impl GroupMembersFetcher for CacheEngine {
    async fn group_members(&self, group_email: &str) -> Result<Vec<Member>, PluginError> {
        Self::group_members(self, group_email).await
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_os_string();
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}
