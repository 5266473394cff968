//! Mount executor backed by the host's `mount`, `mkfs` and resize tools.

use std::ffi::OsString;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use super::{
    DEFAULT_DEVICE_DIR, DEFAULT_MOUNTS_FILE, DEVICE_LINK_PREFIX, MountError, MountExecutor,
    MountTable, device_path_in,
};
use crate::command::{CommandOutput, CommandRunner};
use crate::volume::{MountOptions, VolumeId};

/// `blkid` exit code when the device carries no recognised signature.
const BLKID_NO_SIGNATURE: i32 = 2;

/// Linux implementation of [`MountExecutor`].
#[derive(Clone, Debug)]
pub struct LinuxMountExecutor<R> {
    runner: R,
    zone: String,
    device_dir: Utf8PathBuf,
    mounts_file: Utf8PathBuf,
}

impl<R: CommandRunner> LinuxMountExecutor<R> {
    /// Creates an executor for a node in `zone`. The zone is used to rebuild
    /// full volume identifiers from device links.
    #[must_use]
    pub fn new(runner: R, zone: impl Into<String>) -> Self {
        Self {
            runner,
            zone: zone.into(),
            device_dir: Utf8PathBuf::from(DEFAULT_DEVICE_DIR),
            mounts_file: Utf8PathBuf::from(DEFAULT_MOUNTS_FILE),
        }
    }

    /// Overrides the directory searched for device links.
    #[must_use]
    pub fn with_device_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.device_dir = dir.into();
        self
    }

    /// Overrides the mount table location.
    #[must_use]
    pub fn with_mounts_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    fn device(&self, volume: &VolumeId) -> Result<Utf8PathBuf, MountError> {
        let device = device_path_in(&self.device_dir, volume);
        if device.exists() {
            Ok(device)
        } else {
            Err(MountError::DeviceNotFound { device })
        }
    }

    fn mounts(&self) -> Result<MountTable, MountError> {
        MountTable::read(&self.mounts_file)
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, MountError> {
        let owned: Vec<OsString> = args.iter().map(OsString::from).collect();
        Ok(self.runner.run(program, &owned)?)
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<(), MountError> {
        let output = self.run(program, args)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(MountError::Command {
                program: program.to_owned(),
                code: output.code,
                message: output.diagnostic(),
            })
        }
    }

    fn detect_filesystem(&self, device: &Utf8Path) -> Result<Option<String>, MountError> {
        let output = self.run("blkid", &["-o", "value", "-s", "TYPE", device.as_str()])?;
        match output.code {
            Some(0) => {
                let fs = output.stdout.trim();
                Ok((!fs.is_empty()).then(|| fs.to_owned()))
            }
            Some(BLKID_NO_SIGNATURE) => Ok(None),
            code => Err(MountError::Command {
                program: String::from("blkid"),
                code,
                message: output.diagnostic(),
            }),
        }
    }

    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), MountError> {
        let force = match fs_type {
            "ext2" | "ext3" | "ext4" => "-F",
            "xfs" => "-f",
            other => return Err(MountError::UnsupportedFilesystem(other.to_owned())),
        };
        info!(%device, fs_type, "formatting device");
        self.run_checked(&format!("mkfs.{fs_type}"), &[force, device.as_str()])
    }

    fn mount(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        fs_type: Option<&str>,
        options: &[String],
    ) -> Result<(), MountError> {
        let joined = options.join(",");
        let mut args: Vec<&str> = Vec::new();
        match fs_type {
            Some(fs) => args.extend(["-t", fs]),
            None => args.push("--bind"),
        }
        if !joined.is_empty() {
            args.extend(["-o", joined.as_str()]);
        }
        args.extend([source.as_str(), target.as_str()]);
        self.run_checked("mount", &args)
    }

    fn unmount_if_mounted(&self, target: &Utf8Path) -> Result<bool, MountError> {
        if !self.mounts()?.is_mount_point(target) {
            return Ok(false);
        }
        self.run_checked("umount", &[target.as_str()])?;
        Ok(true)
    }
}

fn create_dir(path: &Utf8Path) -> Result<(), MountError> {
    std::fs::create_dir_all(path).map_err(|err| MountError::Io {
        action: "create directory",
        path: path.to_owned(),
        message: err.to_string(),
    })
}

fn create_file(path: &Utf8Path) -> Result<(), MountError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map(drop)
        .map_err(|err| MountError::Io {
            action: "create file",
            path: path.to_owned(),
            message: err.to_string(),
        })
}

fn remove_target(path: &Utf8Path) {
    let outcome = if path.is_dir() {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    };
    match outcome {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(%path, error = %err, "could not remove publish target"),
    }
}

fn mount_flags(opts: &MountOptions) -> Vec<String> {
    let mut flags = opts.flags.clone();
    if opts.read_only && !flags.iter().any(|flag| flag == "ro") {
        flags.push(String::from("ro"));
    }
    flags
}

impl<R: CommandRunner> MountExecutor for LinuxMountExecutor<R> {
    fn stage(
        &self,
        volume: &VolumeId,
        staging: &Utf8Path,
        opts: &MountOptions,
    ) -> Result<(), MountError> {
        let device = self.device(volume)?;
        let Some(fs_type) = opts.fs_type() else {
            debug!(%volume, "block volume needs no staging mount");
            return Ok(());
        };
        if self.mounts()?.is_mount_point(staging) {
            debug!(%volume, %staging, "already staged");
            return Ok(());
        }

        match self.detect_filesystem(&device)? {
            None => self.format(&device, fs_type)?,
            Some(existing) if existing == fs_type => {}
            Some(existing) => {
                return Err(MountError::InvalidOptions(format!(
                    "device {device} is formatted as {existing}, requested {fs_type}"
                )));
            }
        }

        create_dir(staging)?;
        self.mount(&device, staging, Some(fs_type), &opts.flags)?;
        info!(%volume, %staging, fs_type, "volume staged");
        Ok(())
    }

    fn unstage(&self, volume: &VolumeId, staging: &Utf8Path) -> Result<(), MountError> {
        if self.unmount_if_mounted(staging)? {
            info!(%volume, %staging, "volume unstaged");
        } else {
            debug!(%volume, %staging, "staging path not mounted");
        }
        Ok(())
    }

    fn publish(
        &self,
        volume: &VolumeId,
        target: &Utf8Path,
        staging: &Utf8Path,
        opts: &MountOptions,
    ) -> Result<(), MountError> {
        let mounts = self.mounts()?;
        if mounts.is_mount_point(target) {
            debug!(%volume, %target, "already published");
            return Ok(());
        }

        let flags = mount_flags(opts);
        if opts.is_block() {
            let device = self.device(volume)?;
            create_file(target)?;
            self.mount(&device, target, None, &flags)?;
        } else {
            if !mounts.is_mount_point(staging) {
                return Err(MountError::NotStaged {
                    staging: staging.to_owned(),
                });
            }
            create_dir(target)?;
            self.mount(staging, target, None, &flags)?;
        }
        info!(%volume, %target, read_only = opts.read_only, "volume published");
        Ok(())
    }

    fn unpublish(&self, volume: &VolumeId, target: &Utf8Path) -> Result<(), MountError> {
        if self.unmount_if_mounted(target)? {
            info!(%volume, %target, "volume unpublished");
        }
        remove_target(target);
        Ok(())
    }

    fn expand(&self, volume: &VolumeId, path: &Utf8Path) -> Result<(), MountError> {
        let device = self.device(volume)?;
        match self.detect_filesystem(&device)?.as_deref() {
            Some("ext2" | "ext3" | "ext4") => self.run_checked("resize2fs", &[device.as_str()])?,
            Some("xfs") => self.run_checked("xfs_growfs", &[path.as_str()])?,
            Some(other) => return Err(MountError::UnsupportedFilesystem(other.to_owned())),
            None => {
                return Err(MountError::UnsupportedFilesystem(String::from(
                    "unformatted device",
                )));
            }
        }
        info!(%volume, %path, "filesystem expanded");
        Ok(())
    }

    fn staged_volumes(&self) -> Result<Vec<VolumeId>, MountError> {
        let entries = match std::fs::read_dir(&self.device_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(MountError::Io {
                    action: "list devices in",
                    path: self.device_dir.clone(),
                    message: err.to_string(),
                });
            }
        };

        // Raw block volumes are never mounted at a staging path, so every
        // attached device link counts.
        let mut held: Vec<VolumeId> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let uuid = name.strip_prefix(DEVICE_LINK_PREFIX)?;
                Some(VolumeId::new(format!("{}/{uuid}", self.zone)))
            })
            .collect();
        held.sort();
        Ok(held)
    }
}
