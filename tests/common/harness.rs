//! Driver services wired to in-memory doubles.

use std::sync::Arc;

use scaleway_csi::driver::types::VolumeCapability;
use scaleway_csi::driver::{ControllerService, NodeService};
use scaleway_csi::test_support::{
    FixedStatsProvider, InMemoryVolumeBackend, RecordingMountExecutor,
};
use scaleway_csi::{IdempotentVolumeService, VolumeBackend, VolumeStats};

/// Node-global staging path used by every scenario.
pub const STAGING: &str = "/var/lib/kubelet/plugins/csi.scaleway.com/staging/data";
/// Per-pod publish path used by every scenario.
pub const TARGET: &str = "/var/lib/kubelet/pods/p1/volumes/data";

/// Usage reported for [`TARGET`].
pub const TARGET_STATS: VolumeStats = VolumeStats {
    available_bytes: 6_000_000_000,
    total_bytes: 10_000_000_000,
    used_bytes: 4_000_000_000,
    total_inodes: 655_360,
    used_inodes: 12,
    free_inodes: 655_348,
};

pub struct Harness {
    pub backend: Arc<InMemoryVolumeBackend>,
    pub mounts: Arc<RecordingMountExecutor>,
    pub controller: ControllerService,
    pub node: NodeService,
}

impl Harness {
    /// A plugin running on `server_id` in `location`, with nothing staged.
    pub fn new(server_id: &str, location: &str) -> Self {
        Self::with_mounts(server_id, location, RecordingMountExecutor::new())
    }

    /// A plugin running on `server_id` in `location`, using `executor`.
    pub fn with_mounts(server_id: &str, location: &str, executor: RecordingMountExecutor) -> Self {
        let backend = Arc::new(InMemoryVolumeBackend::new());
        let server = backend.add_server(server_id, location);
        let mounts = Arc::new(executor);
        let stats = FixedStatsProvider::new().with_path(TARGET, TARGET_STATS);

        let volumes = Arc::new(IdempotentVolumeService::new(
            Arc::clone(&backend) as Arc<dyn VolumeBackend>
        ));
        let controller = ControllerService::new(volumes, location);
        let node = NodeService::new(server, Arc::clone(&mounts) as _, Arc::new(stats));
        Self {
            backend,
            mounts,
            controller,
            node,
        }
    }
}

/// Single-node writer capability with an ext4 filesystem.
pub fn filesystem_capability() -> VolumeCapability {
    VolumeCapability::mount("ext4")
}
