//! Filesystem capacity and inode statistics for mounted volumes.

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::statvfs::statvfs;
use thiserror::Error;

use crate::volume::VolumeStats;

/// Errors raised by statistics providers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StatsError {
    /// Raised when the path does not exist.
    #[error("path {0} does not exist")]
    NotFound(Utf8PathBuf),
    /// Raised when the filesystem cannot be queried.
    #[error("statvfs {path}: {message}")]
    Io {
        /// Queried path.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
}

/// Source of filesystem usage figures.
pub trait StatsProvider: Send + Sync {
    /// Returns byte and inode usage of the filesystem mounted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::NotFound`] when `path` is missing.
    fn stats(&self, path: &Utf8Path) -> Result<VolumeStats, StatsError>;
}

/// [`StatsProvider`] backed by `statvfs(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinuxStatsProvider;

impl StatsProvider for LinuxStatsProvider {
    fn stats(&self, path: &Utf8Path) -> Result<VolumeStats, StatsError> {
        let fs = statvfs(path.as_std_path()).map_err(|errno| match errno {
            Errno::ENOENT => StatsError::NotFound(path.to_owned()),
            other => StatsError::Io {
                path: path.to_owned(),
                message: other.desc().to_owned(),
            },
        })?;

        let unit = u64::from(fs.fragment_size());
        let blocks = u64::from(fs.blocks());
        let free = u64::from(fs.blocks_free());
        let available = u64::from(fs.blocks_available());
        let files = u64::from(fs.files());
        let files_free = u64::from(fs.files_free());

        let stats = VolumeStats {
            available_bytes: available.saturating_mul(unit),
            total_bytes: blocks.saturating_mul(unit),
            used_bytes: blocks.saturating_sub(free).saturating_mul(unit),
            total_inodes: files,
            used_inodes: files.saturating_sub(files_free),
            free_inodes: files_free,
        };
        tracing::debug!(%path, ?stats, "filesystem stats");
        Ok(stats)
    }
}
