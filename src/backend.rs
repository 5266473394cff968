//! Backend abstraction over the cloud provider's block volume API.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::volume::{CreateOptions, Server, ServerId, Volume, VolumeId};

/// Errors raised by volume backends.
///
/// Variants carry the semantic kind of the failure so the idempotency layer
/// can reconcile retries without inspecting provider messages.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised when a volume with the requested name already exists.
    #[error("volume '{name}' already exists")]
    VolumeAlreadyExists {
        /// Conflicting volume name.
        name: String,
    },
    /// Raised when a same-named volume exists but cannot satisfy a creation
    /// request.
    #[error("volume '{name}' already exists and is incompatible: {reason}")]
    IncompatibleExisting {
        /// Conflicting volume name.
        name: String,
        /// Why the existing volume does not match.
        reason: String,
    },
    /// Raised when the referenced volume does not exist.
    #[error("volume {0} not found")]
    VolumeNotFound(String),
    /// Raised when the referenced server does not exist.
    #[error("server {0} not found")]
    ServerNotFound(String),
    /// Raised when detaching a volume that is not attached.
    #[error("volume {volume_id} is not attached")]
    NotAttached {
        /// Volume identifier.
        volume_id: VolumeId,
    },
    /// Raised when attaching a volume that is attached to another server.
    #[error("volume {volume_id} is already attached to server {server_id}")]
    AlreadyAttachedElsewhere {
        /// Volume identifier.
        volume_id: VolumeId,
        /// Server currently holding the volume.
        server_id: ServerId,
    },
    /// Raised when the server cannot accept more volumes.
    #[error("server {server_id} has reached its volume attachment limit")]
    AttachLimitReached {
        /// Server that rejected the attach.
        server_id: ServerId,
    },
    /// Raised when the volume and server live in different locations.
    #[error("volume location {volume} does not match server location {server}")]
    LocationMismatch {
        /// Volume location.
        volume: String,
        /// Server location.
        server: String,
    },
    /// Raised when an asynchronous provider action exceeds the wait timeout.
    #[error("timeout waiting for {action} on volume {volume_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Volume identifier.
        volume_id: String,
    },
    /// Raised when the provider cannot be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Opaque provider failure.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider.
        message: String,
    },
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability interface implemented by cloud volume backends.
///
/// Mutating calls must not return until the provider's asynchronous work has
/// reached a terminal state.
pub trait VolumeBackend: Send + Sync {
    /// Creates a volume of exactly `opts.min_size_gb` in `opts.location`.
    ///
    /// Fails with [`VolumeError::VolumeAlreadyExists`] when the name is taken.
    fn create<'a>(&'a self, opts: &'a CreateOptions) -> BackendFuture<'a, Volume, VolumeError>;

    /// Fetches a volume by identifier.
    fn get_by_id<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, VolumeError>;

    /// Fetches a volume by exact name.
    fn get_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Volume, VolumeError>;

    /// Lists every volume visible to the plugin, ordered by identifier.
    fn list(&self) -> BackendFuture<'_, Vec<Volume>, VolumeError>;

    /// Deletes a volume.
    fn delete<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError>;

    /// Attaches a volume to a server.
    fn attach<'a>(
        &'a self,
        volume: &'a Volume,
        server: &'a Server,
    ) -> BackendFuture<'a, (), VolumeError>;

    /// Detaches a volume from whichever server holds it.
    fn detach<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError>;

    /// Grows a volume to `size_gb`.
    fn resize<'a>(&'a self, volume: &'a Volume, size_gb: u64)
    -> BackendFuture<'a, (), VolumeError>;

    /// Fetches a server by identifier.
    fn get_server<'a>(&'a self, id: &'a ServerId) -> BackendFuture<'a, Server, VolumeError>;

    /// Largest volume, in gigabytes, the provider accepts in `location`.
    fn max_volume_size_gb(&self, location: &str) -> u64;
}
