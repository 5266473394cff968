//! Request and response messages exchanged with the orchestrator.
//!
//! Field names follow the CSI protobuf definitions so the JSON encoding reads
//! the same as the gRPC messages it stands in for. Every request tolerates
//! missing fields; validation happens in the services.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Volume access mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    /// Mode not specified.
    #[default]
    Unknown,
    /// Read-write on one node.
    SingleNodeWriter,
    /// Read-only on one node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// One writer among many nodes.
    MultiNodeSingleWriter,
    /// Many writers on many nodes.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Returns `true` for modes a block volume attached to one server can
    /// honour.
    #[must_use]
    pub const fn is_single_node(self) -> bool {
        matches!(self, Self::SingleNodeWriter | Self::SingleNodeReaderOnly)
    }
}

/// Filesystem parameters of a mount access type.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountVolume {
    /// Requested filesystem type; empty selects the default.
    pub fs_type: String,
    /// Extra mount flags.
    pub mount_flags: Vec<String>,
}

/// Whether the volume is consumed as a raw block device or a filesystem.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Raw block device. Carries the same fields as a mount so inconsistent
    /// requests can be detected.
    Block(MountVolume),
    /// Formatted filesystem.
    Mount(MountVolume),
}

impl Default for AccessType {
    fn default() -> Self {
        Self::Mount(MountVolume::default())
    }
}

/// How a volume will be used by a workload.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeCapability {
    /// Block or mount access.
    pub access_type: AccessType,
    /// Access mode.
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// Single-node writer with a filesystem of `fs_type`.
    #[must_use]
    pub fn mount(fs_type: impl Into<String>) -> Self {
        Self {
            access_type: AccessType::Mount(MountVolume {
                fs_type: fs_type.into(),
                mount_flags: Vec::new(),
            }),
            access_mode: AccessMode::SingleNodeWriter,
        }
    }

    /// Single-node writer with raw block access.
    #[must_use]
    pub fn block() -> Self {
        Self {
            access_type: AccessType::Block(MountVolume::default()),
            access_mode: AccessMode::SingleNodeWriter,
        }
    }

    /// Returns `true` for raw block access.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block(_))
    }
}

/// Requested size bounds in bytes. Zero means unspecified.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityRange {
    /// Minimum size.
    pub required_bytes: u64,
    /// Maximum size.
    pub limit_bytes: u64,
}

/// Topology segments, for example `{"topology.csi.scaleway.com/zone": "fr-par-1"}`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    /// Key/value segments.
    pub segments: BTreeMap<String, String>,
}

impl Topology {
    /// Topology with a single segment.
    #[must_use]
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segments: BTreeMap::from([(key.into(), value.into())]),
        }
    }
}

/// Placement constraints for a new volume.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyRequirement {
    /// Acceptable topologies.
    pub requisite: Vec<Topology>,
    /// Topologies in order of preference.
    pub preferred: Vec<Topology>,
}

/// Volume as reported to the orchestrator.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeInfo {
    /// Volume identifier.
    pub volume_id: String,
    /// Size in bytes.
    pub capacity_bytes: u64,
    /// Where the volume can be attached.
    pub accessible_topology: Vec<Topology>,
}

/// CreateVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateVolumeRequest {
    /// Idempotency key.
    pub name: String,
    /// Size bounds.
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Opaque storage class parameters.
    pub parameters: BTreeMap<String, String>,
    /// Placement constraints.
    pub accessibility_requirements: Option<TopologyRequirement>,
}

/// CreateVolume response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateVolumeResponse {
    /// The created or reused volume.
    pub volume: VolumeInfo,
}

/// DeleteVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
}

/// ControllerPublishVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPublishVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Target node (server) identifier.
    pub node_id: String,
    /// Intended use.
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the volume is published read-only.
    pub readonly: bool,
}

/// ControllerPublishVolume response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPublishVolumeResponse {
    /// Data forwarded to the node calls, including the device path.
    pub publish_context: BTreeMap<String, String>,
}

/// ControllerUnpublishVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerUnpublishVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Node to detach from; empty detaches from any node.
    pub node_id: String,
}

/// ValidateVolumeCapabilities request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Capabilities to check.
    pub volume_capabilities: Vec<VolumeCapability>,
}

/// Capabilities confirmed by ValidateVolumeCapabilities.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmedCapabilities {
    /// The confirmed capabilities.
    pub volume_capabilities: Vec<VolumeCapability>,
}

/// ValidateVolumeCapabilities response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Present only when every requested capability is supported.
    pub confirmed: Option<ConfirmedCapabilities>,
    /// Reason for not confirming.
    pub message: String,
}

/// ListVolumes request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListVolumesRequest {
    /// Page size; zero returns everything.
    pub max_entries: u32,
    /// Token returned by a previous call.
    pub starting_token: String,
}

/// One ListVolumes entry.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListVolumesEntry {
    /// The volume.
    pub volume: VolumeInfo,
    /// Nodes the volume is attached to.
    pub published_node_ids: Vec<String>,
}

/// ListVolumes response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListVolumesResponse {
    /// Page of volumes.
    pub entries: Vec<ListVolumesEntry>,
    /// Token for the next page; empty on the last page.
    pub next_token: String,
}

/// GetCapacity request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetCapacityRequest {
    /// Capabilities the capacity must satisfy.
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Topology to report for.
    pub accessible_topology: Option<Topology>,
}

/// GetCapacity response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetCapacityResponse {
    /// Bytes available for new volumes.
    pub available_capacity: u64,
    /// Largest single volume in bytes.
    pub maximum_volume_size: u64,
}

/// Controller capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[expect(missing_docs, reason = "variants mirror the CSI capability names")]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    ListVolumesPublishedNodes,
    GetCapacity,
    ExpandVolume,
}

/// ControllerGetCapabilities response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerGetCapabilitiesResponse {
    /// Supported capabilities.
    pub capabilities: Vec<ControllerCapability>,
}

/// ControllerExpandVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerExpandVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// New size bounds.
    pub capacity_range: Option<CapacityRange>,
    /// Intended use, when known.
    pub volume_capability: Option<VolumeCapability>,
}

/// ControllerExpandVolume response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerExpandVolumeResponse {
    /// Resulting size in bytes.
    pub capacity_bytes: u64,
    /// Whether NodeExpandVolume must follow.
    pub node_expansion_required: bool,
}

/// NodeStageVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStageVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Context returned by ControllerPublishVolume.
    pub publish_context: BTreeMap<String, String>,
    /// Node-global staging directory.
    pub staging_target_path: String,
    /// Intended use.
    pub volume_capability: Option<VolumeCapability>,
}

/// NodeUnstageVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUnstageVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Staging directory to unmount.
    pub staging_target_path: String,
}

/// NodePublishVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePublishVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Context returned by ControllerPublishVolume.
    pub publish_context: BTreeMap<String, String>,
    /// Staging directory used by NodeStageVolume.
    pub staging_target_path: String,
    /// Per-workload target path.
    pub target_path: String,
    /// Intended use.
    pub volume_capability: Option<VolumeCapability>,
    /// Whether to publish read-only.
    pub readonly: bool,
}

/// NodeUnpublishVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUnpublishVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Target path to unmount.
    pub target_path: String,
}

/// NodeGetVolumeStats request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGetVolumeStatsRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Path the volume is published or staged at.
    pub volume_path: String,
}

/// Unit of a [`VolumeUsage`] entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageUnit {
    /// Figures are bytes.
    Bytes,
    /// Figures are inodes.
    Inodes,
}

/// Usage figures for one unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VolumeUsage {
    /// Unit of the figures.
    pub unit: UsageUnit,
    /// Available amount.
    pub available: u64,
    /// Total amount.
    pub total: u64,
    /// Used amount.
    pub used: u64,
}

/// NodeGetVolumeStats response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGetVolumeStatsResponse {
    /// Byte and inode usage.
    pub usage: Vec<VolumeUsage>,
}

/// NodeExpandVolume request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeExpandVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Path the volume is published or staged at.
    pub volume_path: String,
    /// New size bounds.
    pub capacity_range: Option<CapacityRange>,
    /// Intended use, when known.
    pub volume_capability: Option<VolumeCapability>,
}

/// NodeExpandVolume response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeExpandVolumeResponse {
    /// Resulting size in bytes, when known.
    pub capacity_bytes: u64,
}

/// Node capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[expect(missing_docs, reason = "variants mirror the CSI capability names")]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// NodeGetCapabilities response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGetCapabilitiesResponse {
    /// Supported capabilities.
    pub capabilities: Vec<NodeCapability>,
}

/// NodeGetInfo response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGetInfoResponse {
    /// Server identifier of this node.
    pub node_id: String,
    /// Maximum number of volumes the node can hold.
    pub max_volumes_per_node: u64,
    /// Node placement.
    pub accessible_topology: Option<Topology>,
}

/// GetPluginInfo response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPluginInfoResponse {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub vendor_version: String,
}

/// Plugin-level capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[expect(missing_docs, reason = "variants mirror the CSI capability names")]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
    OnlineVolumeExpansion,
}

/// GetPluginCapabilities response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPluginCapabilitiesResponse {
    /// Supported capabilities.
    pub capabilities: Vec<PluginCapability>,
}

/// Probe response.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeResponse {
    /// Whether the plugin is ready to serve.
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_accept_missing_fields() {
        let req: NodeStageVolumeRequest =
            serde_json::from_str(r#"{"volume_id":"fr-par-1/x"}"#).expect("parse");
        assert_eq!(req.volume_id, "fr-par-1/x");
        assert!(req.volume_capability.is_none());
    }

    #[test]
    fn capability_json_shape() {
        let json = serde_json::to_value(VolumeCapability::mount("ext4")).expect("serialise");
        assert_eq!(
            json,
            serde_json::json!({
                "access_type": {"mount": {"fs_type": "ext4", "mount_flags": []}},
                "access_mode": "SINGLE_NODE_WRITER"
            })
        );
    }

    #[test]
    fn only_single_node_modes_are_supported() {
        assert!(AccessMode::SingleNodeReaderOnly.is_single_node());
        assert!(!AccessMode::MultiNodeMultiWriter.is_single_node());
        assert!(!AccessMode::Unknown.is_single_node());
    }
}
