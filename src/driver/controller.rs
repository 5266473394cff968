//! Controller service: provisioning and attachment of volumes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use super::types::{
    ConfirmedCapabilities, ControllerCapability, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerGetCapabilitiesResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest, CreateVolumeRequest, CreateVolumeResponse,
    DeleteVolumeRequest, GetCapacityRequest, GetCapacityResponse, ListVolumesEntry,
    ListVolumesRequest, ListVolumesResponse, Topology, TopologyRequirement,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, VolumeCapability,
    VolumeInfo,
};
use super::{DEVICE_PATH_KEY, Status, TOPOLOGY_ZONE_KEY, volume_size_gb};
use crate::backend::VolumeError;
use crate::idempotent::IdempotentVolumeService;
use crate::mount::device_path;
use crate::volume::{BYTES_PER_GB, CreateOptions, ServerId, Volume, VolumeId};

const CAPABILITIES: [ControllerCapability; 6] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::ListVolumes,
    ControllerCapability::ListVolumesPublishedNodes,
    ControllerCapability::GetCapacity,
    ControllerCapability::ExpandVolume,
];

/// Translates controller requests into idempotent volume operations.
pub struct ControllerService {
    volumes: Arc<IdempotentVolumeService>,
    location: String,
}

fn require(value: &str, field: &str) -> Result<(), Status> {
    if value.trim().is_empty() {
        Err(Status::invalid_argument(format!("missing {field}")))
    } else {
        Ok(())
    }
}

fn unsupported_capability(capabilities: &[VolumeCapability]) -> Option<&VolumeCapability> {
    capabilities
        .iter()
        .find(|cap| !cap.access_mode.is_single_node())
}

fn zone_of(topology: &Topology) -> Option<&str> {
    topology.segments.get(TOPOLOGY_ZONE_KEY).map(String::as_str)
}

fn requested_location(topology: Option<&TopologyRequirement>) -> Option<&str> {
    let requirement = topology?;
    requirement
        .preferred
        .iter()
        .chain(&requirement.requisite)
        .find_map(zone_of)
}

fn volume_info(volume: &Volume) -> VolumeInfo {
    VolumeInfo {
        volume_id: volume.id.to_string(),
        capacity_bytes: volume.size_bytes(),
        accessible_topology: vec![Topology::single(TOPOLOGY_ZONE_KEY, &volume.location)],
    }
}

impl ControllerService {
    /// Creates a controller that places volumes in `location` unless a
    /// request says otherwise.
    #[must_use]
    pub fn new(volumes: Arc<IdempotentVolumeService>, location: impl Into<String>) -> Self {
        Self {
            volumes,
            location: location.into(),
        }
    }

    /// Creates a volume, or returns the compatible volume that already
    /// carries the requested name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a missing name or capabilities,
    /// `OutOfRange` for unsatisfiable sizes and `AlreadyExists` when a
    /// same-named volume is incompatible.
    #[instrument(skip_all, fields(name = %req.name))]
    pub async fn create_volume(
        &self,
        req: &CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, Status> {
        require(&req.name, "name")?;
        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument("missing volume capabilities"));
        }
        if let Some(cap) = unsupported_capability(&req.volume_capabilities) {
            return Err(Status::invalid_argument(format!(
                "unsupported access mode {:?}",
                cap.access_mode
            )));
        }

        let (min_size_gb, max_size_gb) = volume_size_gb(req.capacity_range.as_ref())?;
        let location = requested_location(req.accessibility_requirements.as_ref())
            .unwrap_or(&self.location);
        let opts = CreateOptions::new(&req.name, min_size_gb, max_size_gb, location);

        let volume = self.volumes.create(&opts).await?;
        Ok(CreateVolumeResponse {
            volume: volume_info(&volume),
        })
    }

    /// Deletes a volume; unknown volumes count as deleted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a missing id and maps backend failures.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), Status> {
        require(&req.volume_id, "volume id")?;
        let volume = match self.volumes.get_by_id(&VolumeId::new(req.volume_id)).await {
            Ok(volume) => volume,
            Err(VolumeError::VolumeNotFound(_)) => {
                info!("volume already gone");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.volumes.delete(&volume).await?;
        Ok(())
    }

    /// Attaches a volume to the node's server.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown volumes or servers,
    /// `FailedPrecondition` when they live in different zones and
    /// `ResourceExhausted` when the server holds too many volumes.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, server_id = %req.node_id))]
    pub async fn publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, Status> {
        require(&req.volume_id, "volume id")?;
        require(&req.node_id, "node id")?;
        if req.volume_capability.is_none() {
            return Err(Status::invalid_argument("missing volume capability"));
        }

        let volume = self
            .volumes
            .get_by_id(&VolumeId::new(req.volume_id))
            .await?;
        let server = self
            .volumes
            .get_server(&ServerId::new(req.node_id))
            .await?;
        if volume.location != server.location {
            return Err(VolumeError::LocationMismatch {
                volume: volume.location,
                server: server.location,
            }
            .into());
        }

        self.volumes.attach(&volume, &server).await?;
        Ok(ControllerPublishVolumeResponse {
            publish_context: BTreeMap::from([(
                String::from(DEVICE_PATH_KEY),
                device_path(&volume.id).into_string(),
            )]),
        })
    }

    /// Detaches a volume from the node's server. Missing volumes and servers
    /// count as detached.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a missing id and maps backend failures.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, server_id = %req.node_id))]
    pub async fn unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), Status> {
        require(&req.volume_id, "volume id")?;

        let volume = match self.volumes.get_by_id(&VolumeId::new(req.volume_id)).await {
            Ok(volume) => volume,
            Err(VolumeError::VolumeNotFound(_)) => {
                info!("volume already gone");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let server = if req.node_id.trim().is_empty() {
            None
        } else {
            match self.volumes.get_server(&ServerId::new(req.node_id)).await {
                Ok(server) => Some(server.id),
                Err(VolumeError::ServerNotFound(_)) => {
                    info!("server already gone");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        };

        match self.volumes.detach(&volume, server.as_ref()).await {
            Ok(()) | Err(VolumeError::VolumeNotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Confirms capabilities when every one of them is single-node access.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing fields and `NotFound` for an
    /// unknown volume.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, Status> {
        require(&req.volume_id, "volume id")?;
        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument("missing volume capabilities"));
        }
        self.volumes
            .get_by_id(&VolumeId::new(req.volume_id))
            .await?;

        let response = match unsupported_capability(&req.volume_capabilities) {
            Some(cap) => ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: format!("unsupported access mode {:?}", cap.access_mode),
            },
            None => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(ConfirmedCapabilities {
                    volume_capabilities: req.volume_capabilities,
                }),
                message: String::new(),
            },
        };
        Ok(response)
    }

    /// Lists volumes page by page. Tokens are decimal offsets.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` for a token that does not parse or points past the
    /// end of the listing.
    #[instrument(skip_all, fields(token = %req.starting_token, max_entries = req.max_entries))]
    pub async fn list_volumes(
        &self,
        req: &ListVolumesRequest,
    ) -> Result<ListVolumesResponse, Status> {
        let volumes = self.volumes.list().await?;
        let start = if req.starting_token.is_empty() {
            0
        } else {
            req.starting_token
                .parse::<usize>()
                .ok()
                .filter(|offset| *offset <= volumes.len())
                .ok_or_else(|| {
                    Status::aborted(format!("invalid starting token {}", req.starting_token))
                })?
        };

        let page = match usize::try_from(req.max_entries) {
            Ok(0) | Err(_) => volumes.len(),
            Ok(max) => max,
        };
        let entries: Vec<ListVolumesEntry> = volumes
            .iter()
            .skip(start)
            .take(page)
            .map(|volume| ListVolumesEntry {
                volume: volume_info(volume),
                published_node_ids: volume.server.iter().map(ToString::to_string).collect(),
            })
            .collect();
        let end = start.saturating_add(entries.len());
        let next_token = if end < volumes.len() {
            end.to_string()
        } else {
            String::new()
        };
        Ok(ListVolumesResponse {
            entries,
            next_token,
        })
    }

    /// Reports the largest volume that can be created in the requested zone.
    #[must_use]
    pub fn get_capacity(&self, req: &GetCapacityRequest) -> GetCapacityResponse {
        let location = req
            .accessible_topology
            .as_ref()
            .and_then(zone_of)
            .unwrap_or(&self.location);
        let bytes = self
            .volumes
            .backend()
            .max_volume_size_gb(location)
            .saturating_mul(BYTES_PER_GB);
        GetCapacityResponse {
            available_capacity: bytes,
            maximum_volume_size: bytes,
        }
    }

    /// Lists the controller capabilities.
    #[must_use]
    pub fn get_capabilities(&self) -> ControllerGetCapabilitiesResponse {
        ControllerGetCapabilitiesResponse {
            capabilities: CAPABILITIES.to_vec(),
        }
    }

    /// Grows a volume. Filesystem volumes additionally need node expansion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing fields, `NotFound` for an unknown
    /// volume and `OutOfRange` for unsatisfiable sizes.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    pub async fn expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, Status> {
        require(&req.volume_id, "volume id")?;
        let Some(range) = req.capacity_range else {
            return Err(Status::invalid_argument("missing capacity range"));
        };
        let (min_size_gb, _) = volume_size_gb(Some(&range))?;
        let volume = self
            .volumes
            .get_by_id(&VolumeId::new(req.volume_id))
            .await?;

        let size_gb = self.volumes.resize(&volume, min_size_gb).await?;
        let node_expansion_required = !req
            .volume_capability
            .as_ref()
            .is_some_and(VolumeCapability::is_block);
        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: size_gb.saturating_mul(BYTES_PER_GB),
            node_expansion_required,
        })
    }
}
