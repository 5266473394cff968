//! Retry-safe wrapper around a [`VolumeBackend`].
//!
//! Every operation reads the remote state, compares it with the request and
//! only acts on the difference, so a request replayed after a timeout or a
//! crash converges on the same outcome. The only in-process state is two lock
//! tables: one keyed by volume id for attach, detach, resize and delete, and
//! one keyed by name for create. They serialise concurrent local callers but
//! do not coordinate separate plugin instances.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::backend::{VolumeBackend, VolumeError};
use crate::volume::{CreateOptions, Server, ServerId, Volume, VolumeId};

type LockTable<K> = HashMap<K, Arc<tokio::sync::Mutex<()>>>;

/// Keyed async locks, pruned when the last holder releases.
#[derive(Debug)]
struct KeyedLocks<K> {
    table: Arc<Mutex<LockTable<K>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Arc::default(),
        }
    }
}

struct KeyedLockGuard<K: Eq + Hash> {
    key: K,
    table: Arc<Mutex<LockTable<K>>>,
    guard: OwnedMutexGuard<()>,
}

impl<K: Clone + Eq + Hash> KeyedLocks<K> {
    async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        KeyedLockGuard {
            key: key.clone(),
            table: Arc::clone(&self.table),
            guard: mutex.lock_owned().await,
        }
    }

    fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K: Eq + Hash> Drop for KeyedLockGuard<K> {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = table.get(&self.key).is_some_and(|entry| {
            Arc::ptr_eq(entry, OwnedMutexGuard::mutex(&self.guard)) && Arc::strong_count(entry) == 2
        });
        if idle {
            table.remove(&self.key);
        }
    }
}

/// Converts backend conflicts into deterministic, retry-safe outcomes.
pub struct IdempotentVolumeService {
    backend: Arc<dyn VolumeBackend>,
    locks: KeyedLocks<VolumeId>,
    names: KeyedLocks<String>,
}

impl IdempotentVolumeService {
    /// Wraps `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::default(),
            names: KeyedLocks::default(),
        }
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &dyn VolumeBackend {
        self.backend.as_ref()
    }

    /// Creates a volume, or returns the existing same-named volume when it is
    /// compatible with `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::IncompatibleExisting`] when a volume with the
    /// same name exists but is too small, too large or in another location,
    /// and [`VolumeError::VolumeAlreadyExists`] when the conflicting volume
    /// disappears before it can be inspected. Other backend failures are
    /// propagated.
    #[instrument(skip(self, opts), fields(name = %opts.name, location = %opts.location))]
    pub async fn create(&self, opts: &CreateOptions) -> Result<Volume, VolumeError> {
        let _lock = self.names.lock(&opts.name).await;
        info!(
            min_size_gb = opts.min_size_gb,
            max_size_gb = opts.max_size_gb,
            "creating volume"
        );
        match self.backend.create(opts).await {
            Ok(volume) => {
                info!(volume_id = %volume.id, "volume created");
                Ok(volume)
            }
            Err(VolumeError::VolumeAlreadyExists { .. }) => self.reuse_existing(opts).await,
            Err(err) => Err(err),
        }
    }

    async fn reuse_existing(&self, opts: &CreateOptions) -> Result<Volume, VolumeError> {
        info!("another volume with that name already exists");
        let existing = match self.backend.get_by_name(&opts.name).await {
            Ok(volume) => volume,
            Err(VolumeError::VolumeNotFound(_)) => {
                warn!("existing volume disappeared");
                return Err(VolumeError::VolumeAlreadyExists {
                    name: opts.name.clone(),
                });
            }
            Err(err) => return Err(err),
        };
        if let Some(reason) = opts.incompatibility(&existing) {
            info!(volume_id = %existing.id, %reason, "existing volume does not match");
            return Err(VolumeError::IncompatibleExisting {
                name: opts.name.clone(),
                reason: reason.to_string(),
            });
        }
        info!(volume_id = %existing.id, "reusing existing volume");
        Ok(existing)
    }

    /// Detaches (best effort) and deletes a volume. A volume that is already
    /// gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than [`VolumeError::VolumeNotFound`].
    #[instrument(skip_all, fields(volume_id = %volume.id))]
    pub async fn delete(&self, volume: &Volume) -> Result<(), VolumeError> {
        let _lock = self.locks.lock(&volume.id).await;
        if let Err(err) = self.backend.detach(volume).await {
            info!(error = %err, "ignoring detach failure before delete");
        }
        match self.backend.delete(volume).await {
            Ok(()) | Err(VolumeError::VolumeNotFound(_)) => {
                info!("volume deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Attaches a volume to `server`, moving it off any other server first.
    ///
    /// # Errors
    ///
    /// Propagates the pre-read failure and any attach failure that cannot be
    /// reconciled against the volume's current state, including
    /// [`VolumeError::AttachLimitReached`].
    #[instrument(skip_all, fields(volume_id = %volume.id, server_id = %server.id))]
    pub async fn attach(&self, volume: &Volume, server: &Server) -> Result<(), VolumeError> {
        let _lock = self.locks.lock(&volume.id).await;
        let before = self.backend.get_by_id(&volume.id).await?;
        if before.is_attached_to(&server.id) {
            info!("volume already attached to requested server");
            return Ok(());
        }

        if let Some(current) = before.server.as_ref().filter(|id| **id != server.id) {
            info!(current_server = %current, "detaching volume from previous server");
            if let Err(err) = self.backend.detach(&before).await {
                warn!(error = %err, "detach before reattach failed");
            }
        }

        let Err(attach_err) = self.backend.attach(&before, server).await else {
            info!("volume attached");
            return Ok(());
        };

        let observed = match self.backend.get_by_id(&volume.id).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "re-read after failed attach failed, using previous state");
                before
            }
        };
        if observed.is_attached_to(&server.id) {
            info!(error = %attach_err, "volume already attached to requested server");
            return Ok(());
        }
        Err(attach_err)
    }

    /// Detaches a volume. When `server` is given and the volume is attached
    /// to a different server, nothing is done.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than [`VolumeError::NotAttached`].
    #[instrument(skip_all, fields(volume_id = %volume.id))]
    pub async fn detach(
        &self,
        volume: &Volume,
        server: Option<&ServerId>,
    ) -> Result<(), VolumeError> {
        let _lock = self.locks.lock(&volume.id).await;
        let current = match server {
            Some(expected) => {
                let current = self.backend.get_by_id(&volume.id).await?;
                match current.server.as_ref() {
                    None => {
                        info!("volume is not attached");
                        return Ok(());
                    }
                    Some(holder) if holder != expected => {
                        info!(server_id = %holder, "volume attached to another server, leaving it");
                        return Ok(());
                    }
                    Some(_) => current,
                }
            }
            None => volume.clone(),
        };
        match self.backend.detach(&current).await {
            Ok(()) | Err(VolumeError::NotAttached { .. }) => {
                info!("volume detached");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Grows a volume to at least `min_size_gb`. Already large enough volumes
    /// are left alone. Returns the resulting size.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    #[instrument(skip_all, fields(volume_id = %volume.id, min_size_gb))]
    pub async fn resize(&self, volume: &Volume, min_size_gb: u64) -> Result<u64, VolumeError> {
        let _lock = self.locks.lock(&volume.id).await;
        let current = self.backend.get_by_id(&volume.id).await?;
        if current.size_gb >= min_size_gb {
            info!(size_gb = current.size_gb, "volume already large enough");
            return Ok(current.size_gb);
        }
        self.backend.resize(&current, min_size_gb).await?;
        info!("volume resized");
        Ok(min_size_gb)
    }

    /// Fetches a volume by identifier.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_by_id(&self, id: &VolumeId) -> Result<Volume, VolumeError> {
        self.backend.get_by_id(id).await
    }

    /// Fetches a volume by name.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_by_name(&self, name: &str) -> Result<Volume, VolumeError> {
        self.backend.get_by_name(name).await
    }

    /// Fetches a server by identifier.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_server(&self, id: &ServerId) -> Result<Server, VolumeError> {
        self.backend.get_server(id).await
    }

    /// Lists all volumes.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        self.backend.list().await
    }

    /// Number of volumes with a live lock entry.
    #[must_use]
    pub fn locked_volumes(&self) -> usize {
        self.locks.len()
    }

    /// Number of volume names with a live creation lock entry.
    #[must_use]
    pub fn locked_names(&self) -> usize {
        self.names.len()
    }
}
