//! Node-local staging and publishing of block devices.

mod linux;
mod table;

pub use linux::LinuxMountExecutor;
pub use table::{MountEntry, MountTable};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::command::CommandError;
use crate::volume::{MountOptions, VolumeId};

/// Directory holding stable device links.
pub const DEFAULT_DEVICE_DIR: &str = "/dev/disk/by-id";

/// Prefix of the stable link Scaleway creates for a Block SSD volume.
pub const DEVICE_LINK_PREFIX: &str = "scsi-0SCW_b_ssd_volume-";

/// Kernel view of the current mount namespace.
pub const DEFAULT_MOUNTS_FILE: &str = "/proc/self/mounts";

/// Errors raised by mount executors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// Raised when the device for a volume is not present on the node.
    #[error("device {device} not found")]
    DeviceNotFound {
        /// Expected device path.
        device: Utf8PathBuf,
    },
    /// Raised when publishing a filesystem volume that has not been staged.
    #[error("staging path {staging} is not mounted")]
    NotStaged {
        /// Staging path that should have been mounted.
        staging: Utf8PathBuf,
    },
    /// Raised when the mount options cannot be honoured.
    #[error("invalid mount options: {0}")]
    InvalidOptions(String),
    /// Raised when the filesystem type has no supported tooling.
    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),
    /// Raised when an external program exits unsuccessfully.
    #[error("{program} failed with exit code {code:?}: {message}")]
    Command {
        /// Program name.
        program: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Diagnostic output.
        message: String,
    },
    /// Raised when an external program cannot be started.
    #[error(transparent)]
    Spawn(#[from] CommandError),
    /// Raised when a local filesystem operation fails.
    #[error("{action} {path}: {message}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
}

/// Node-local operations on staged and published volumes.
///
/// Implementations must be idempotent: repeating a call whose effect is
/// already in place succeeds without acting again.
pub trait MountExecutor: Send + Sync {
    /// Formats (if blank) and mounts the volume's device at `staging`. Raw
    /// block volumes need no staging mount.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the device is missing or a command fails.
    fn stage(
        &self,
        volume: &VolumeId,
        staging: &Utf8Path,
        opts: &MountOptions,
    ) -> Result<(), MountError>;

    /// Unmounts the staging path.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when unmounting fails.
    fn unstage(&self, volume: &VolumeId, staging: &Utf8Path) -> Result<(), MountError>;

    /// Bind-mounts a staged volume (or the raw device) at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::NotStaged`] when a filesystem volume is published
    /// before being staged, or another [`MountError`] when mounting fails.
    fn publish(
        &self,
        volume: &VolumeId,
        target: &Utf8Path,
        staging: &Utf8Path,
        opts: &MountOptions,
    ) -> Result<(), MountError>;

    /// Unmounts and removes the publish target.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when unmounting fails.
    fn unpublish(&self, volume: &VolumeId, target: &Utf8Path) -> Result<(), MountError>;

    /// Grows the filesystem on the volume's device to fill the device.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the filesystem cannot be grown.
    fn expand(&self, volume: &VolumeId, path: &Utf8Path) -> Result<(), MountError>;

    /// Volumes held by this node: every attached device, whether staged as a
    /// filesystem or used as a raw block device.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Io`] when the device directory cannot be read.
    fn staged_volumes(&self) -> Result<Vec<VolumeId>, MountError>;
}

/// Provider-assigned UUID part of a `<zone>/<uuid>` volume identifier.
#[must_use]
pub fn volume_uuid(volume: &VolumeId) -> &str {
    volume
        .as_str()
        .rsplit_once('/')
        .map_or(volume.as_str(), |(_, uuid)| uuid)
}

/// Stable device path of `volume` under the default device directory.
#[must_use]
pub fn device_path(volume: &VolumeId) -> Utf8PathBuf {
    device_path_in(Utf8Path::new(DEFAULT_DEVICE_DIR), volume)
}

/// Stable device path of `volume` under `device_dir`.
#[must_use]
pub fn device_path_in(device_dir: &Utf8Path, volume: &VolumeId) -> Utf8PathBuf {
    device_dir.join(format!("{DEVICE_LINK_PREFIX}{}", volume_uuid(volume)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_uses_uuid_part() {
        let id = VolumeId::new("fr-par-1/7c4a0e2b-4d27-4a53-9d3c-1e7f2b1c9a10");
        assert_eq!(
            device_path(&id).as_str(),
            "/dev/disk/by-id/scsi-0SCW_b_ssd_volume-7c4a0e2b-4d27-4a53-9d3c-1e7f2b1c9a10"
        );
    }

    #[test]
    fn bare_ids_are_used_verbatim() {
        assert_eq!(volume_uuid(&VolumeId::new("abc")), "abc");
    }
}
