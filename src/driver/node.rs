//! Node service: staging and publishing on the local server.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{info, instrument};

use super::types::{
    AccessType, NodeCapability, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesResponse, NodeGetInfoResponse, NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, Topology, UsageUnit,
    VolumeCapability, VolumeUsage,
};
use super::{MAX_VOLUMES_PER_NODE, Status, TOPOLOGY_ZONE_KEY};
use crate::mount::{MountError, MountExecutor};
use crate::stats::StatsProvider;
use crate::volume::{AccessKind, MountOptions, Server, VolumeId};

/// Filesystem used when a mount capability does not name one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

const CAPABILITIES: [NodeCapability; 3] = [
    NodeCapability::StageUnstageVolume,
    NodeCapability::GetVolumeStats,
    NodeCapability::ExpandVolume,
];

/// Serves node requests for the server the plugin runs on.
pub struct NodeService {
    server: Server,
    mounts: Arc<dyn MountExecutor>,
    stats: Arc<dyn StatsProvider>,
}

fn required_path(value: &str, field: &str) -> Result<Utf8PathBuf, Status> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Status::invalid_argument(format!("missing {field}")))
    } else {
        Ok(Utf8PathBuf::from(trimmed))
    }
}

fn required_id(value: &str) -> Result<VolumeId, Status> {
    let id = VolumeId::new(value);
    if id.is_empty() {
        Err(Status::invalid_argument("missing volume id"))
    } else {
        Ok(id)
    }
}

/// Converts a capability into mount options, rejecting filesystem settings
/// on raw block access.
fn mount_options(
    capability: Option<&VolumeCapability>,
    read_only: bool,
) -> Result<MountOptions, Status> {
    let capability =
        capability.ok_or_else(|| Status::invalid_argument("missing volume capability"))?;
    let (access, flags) = match &capability.access_type {
        AccessType::Block(mount) => {
            if !mount.fs_type.is_empty() || !mount.mount_flags.is_empty() {
                return Err(Status::invalid_argument(
                    "block access does not take a filesystem type or mount flags",
                ));
            }
            (AccessKind::Block, Vec::new())
        }
        AccessType::Mount(mount) => {
            let fs_type = if mount.fs_type.is_empty() {
                DEFAULT_FS_TYPE.to_owned()
            } else {
                mount.fs_type.clone()
            };
            (AccessKind::Filesystem { fs_type }, mount.mount_flags.clone())
        }
    };
    Ok(MountOptions {
        access,
        flags,
        read_only,
    })
}

impl NodeService {
    /// Creates a node service for `server`.
    #[must_use]
    pub fn new(
        server: Server,
        mounts: Arc<dyn MountExecutor>,
        stats: Arc<dyn StatsProvider>,
    ) -> Self {
        Self {
            server,
            mounts,
            stats,
        }
    }

    async fn with_mounts<T, F>(&self, op: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MountExecutor) -> Result<T, MountError> + Send + 'static,
    {
        let mounts = Arc::clone(&self.mounts);
        tokio::task::spawn_blocking(move || op(mounts.as_ref()))
            .await
            .map_err(|err| Status::internal(format!("mount task failed: {err}")))?
            .map_err(Status::from)
    }

    /// Stages a volume at the node-global staging path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing or inconsistent fields and
    /// `ResourceExhausted` when the node already holds the maximum number of
    /// volumes and this one is not among them.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn stage_volume(&self, req: &NodeStageVolumeRequest) -> Result<(), Status> {
        let volume = required_id(&req.volume_id)?;
        let staging = required_path(&req.staging_target_path, "staging target path")?;
        let opts = mount_options(req.volume_capability.as_ref(), false)?;

        self.with_mounts(move |mounts| {
            let staged = mounts.staged_volumes()?;
            let count = u64::try_from(staged.len()).unwrap_or(u64::MAX);
            if !staged.contains(&volume) && count >= MAX_VOLUMES_PER_NODE {
                return Ok(Err(Status::resource_exhausted(format!(
                    "node already holds {count} volumes"
                ))));
            }
            mounts.stage(&volume, &staging, &opts).map(Ok)
        })
        .await?
    }

    /// Unmounts the staging path. Already unstaged volumes succeed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing fields.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn unstage_volume(&self, req: &NodeUnstageVolumeRequest) -> Result<(), Status> {
        let volume = required_id(&req.volume_id)?;
        let staging = required_path(&req.staging_target_path, "staging target path")?;
        self.with_mounts(move |mounts| mounts.unstage(&volume, &staging))
            .await
    }

    /// Publishes a staged volume at the workload's target path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing or inconsistent fields and
    /// `FailedPrecondition` when a filesystem volume has not been staged.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn publish_volume(&self, req: &NodePublishVolumeRequest) -> Result<(), Status> {
        let volume = required_id(&req.volume_id)?;
        let target = required_path(&req.target_path, "target path")?;
        let staging = required_path(&req.staging_target_path, "staging target path")?;
        let opts = mount_options(req.volume_capability.as_ref(), req.readonly)?;
        self.with_mounts(move |mounts| mounts.publish(&volume, &target, &staging, &opts))
            .await
    }

    /// Unmounts the target path. Already unpublished volumes succeed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing fields.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn unpublish_volume(&self, req: &NodeUnpublishVolumeRequest) -> Result<(), Status> {
        let volume = required_id(&req.volume_id)?;
        let target = required_path(&req.target_path, "target path")?;
        self.with_mounts(move |mounts| mounts.unpublish(&volume, &target))
            .await
    }

    /// Reports byte and inode usage of the filesystem at the volume path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the path does not exist.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub fn get_volume_stats(
        &self,
        req: &NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, Status> {
        required_id(&req.volume_id)?;
        let path = required_path(&req.volume_path, "volume path")?;
        let stats = self.stats.stats(&path)?;
        Ok(NodeGetVolumeStatsResponse {
            usage: vec![
                VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: stats.available_bytes,
                    total: stats.total_bytes,
                    used: stats.used_bytes,
                },
                VolumeUsage {
                    unit: UsageUnit::Inodes,
                    available: stats.free_inodes,
                    total: stats.total_inodes,
                    used: stats.used_inodes,
                },
            ],
        })
    }

    /// Grows the filesystem on a staged volume after a controller resize.
    /// Raw block volumes need no node work.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing fields and maps executor
    /// failures.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn expand_volume(
        &self,
        req: &NodeExpandVolumeRequest,
    ) -> Result<NodeExpandVolumeResponse, Status> {
        let volume = required_id(&req.volume_id)?;
        let path = required_path(&req.volume_path, "volume path")?;
        let capacity_bytes = req
            .capacity_range
            .map_or(0, |range| range.required_bytes);

        if req
            .volume_capability
            .as_ref()
            .is_some_and(VolumeCapability::is_block)
        {
            info!("block volume needs no filesystem expansion");
            return Ok(NodeExpandVolumeResponse { capacity_bytes });
        }
        self.with_mounts(move |mounts| mounts.expand(&volume, &path))
            .await?;
        Ok(NodeExpandVolumeResponse { capacity_bytes })
    }

    /// Lists the node capabilities.
    #[must_use]
    pub fn get_capabilities(&self) -> NodeGetCapabilitiesResponse {
        NodeGetCapabilitiesResponse {
            capabilities: CAPABILITIES.to_vec(),
        }
    }

    /// Reports the node id, volume ceiling and zone.
    #[must_use]
    pub fn get_info(&self) -> NodeGetInfoResponse {
        NodeGetInfoResponse {
            node_id: self.server.id.to_string(),
            max_volumes_per_node: MAX_VOLUMES_PER_NODE,
            accessible_topology: Some(Topology::single(
                TOPOLOGY_ZONE_KEY,
                &self.server.location,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::MountVolume;
    use rstest::rstest;

    #[rstest]
    #[case(MountVolume { fs_type: String::from("ext4"), mount_flags: Vec::new() })]
    #[case(MountVolume { fs_type: String::new(), mount_flags: vec![String::from("noatime")] })]
    fn block_access_rejects_filesystem_settings(#[case] mount: MountVolume) {
        let capability = VolumeCapability {
            access_type: AccessType::Block(mount),
            ..VolumeCapability::block()
        };
        let err = mount_options(Some(&capability), false).expect_err("inconsistent");
        assert_eq!(err.code, super::super::Code::InvalidArgument);
    }

    #[test]
    fn mount_access_defaults_to_ext4() {
        let opts = mount_options(Some(&VolumeCapability::mount("")), true).expect("options");
        assert_eq!(opts.fs_type(), Some(DEFAULT_FS_TYPE));
        assert!(opts.read_only);
    }

    #[test]
    fn missing_capability_is_invalid() {
        let err = mount_options(None, false).expect_err("missing");
        assert_eq!(err.code, super::super::Code::InvalidArgument);
    }
}
