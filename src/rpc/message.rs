//! Request and response envelopes carried over the plugin socket.
//!
//! Each line on the socket is one JSON document. Requests look like
//! `{"method": "CreateVolume", "params": {...}}`; parameterless methods omit
//! `params`. Responses look like `{"result": "CreateVolume", "body": {...}}`
//! or `{"result": "Error", "body": {"code": "NOT_FOUND", "message": "..."}}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::Status;
use crate::driver::types::{
    ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest, CreateVolumeRequest,
    CreateVolumeResponse, DeleteVolumeRequest, GetCapacityRequest, GetCapacityResponse,
    GetPluginCapabilitiesResponse, GetPluginInfoResponse, ListVolumesRequest,
    ListVolumesResponse, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesResponse, NodeGetInfoResponse, NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, ProbeResponse,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
};

/// A request for one identity, controller or node operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
#[expect(missing_docs, reason = "variants are named after the operations they invoke")]
pub enum CsiRequest {
    // identity
    GetPluginInfo,
    GetPluginCapabilities,
    Probe,

    // controller
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(DeleteVolumeRequest),
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    ListVolumes(ListVolumesRequest),
    GetCapacity(GetCapacityRequest),
    ControllerGetCapabilities,
    ControllerExpandVolume(ControllerExpandVolumeRequest),

    // node
    NodeStageVolume(NodeStageVolumeRequest),
    NodeUnstageVolume(NodeUnstageVolumeRequest),
    NodePublishVolume(NodePublishVolumeRequest),
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    NodeGetVolumeStats(NodeGetVolumeStatsRequest),
    NodeExpandVolume(NodeExpandVolumeRequest),
    NodeGetCapabilities,
    NodeGetInfo,
}

impl CsiRequest {
    /// Operation name, as it appears in the `method` field.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetPluginInfo => "GetPluginInfo",
            Self::GetPluginCapabilities => "GetPluginCapabilities",
            Self::Probe => "Probe",
            Self::CreateVolume(_) => "CreateVolume",
            Self::DeleteVolume(_) => "DeleteVolume",
            Self::ControllerPublishVolume(_) => "ControllerPublishVolume",
            Self::ControllerUnpublishVolume(_) => "ControllerUnpublishVolume",
            Self::ValidateVolumeCapabilities(_) => "ValidateVolumeCapabilities",
            Self::ListVolumes(_) => "ListVolumes",
            Self::GetCapacity(_) => "GetCapacity",
            Self::ControllerGetCapabilities => "ControllerGetCapabilities",
            Self::ControllerExpandVolume(_) => "ControllerExpandVolume",
            Self::NodeStageVolume(_) => "NodeStageVolume",
            Self::NodeUnstageVolume(_) => "NodeUnstageVolume",
            Self::NodePublishVolume(_) => "NodePublishVolume",
            Self::NodeUnpublishVolume(_) => "NodeUnpublishVolume",
            Self::NodeGetVolumeStats(_) => "NodeGetVolumeStats",
            Self::NodeExpandVolume(_) => "NodeExpandVolume",
            Self::NodeGetCapabilities => "NodeGetCapabilities",
            Self::NodeGetInfo => "NodeGetInfo",
        }
    }
}

impl fmt::Display for CsiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// The answer to a [`CsiRequest`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "body")]
#[expect(missing_docs, reason = "variants are named after the operations they answer")]
pub enum CsiResponse {
    PluginInfo(GetPluginInfoResponse),
    PluginCapabilities(GetPluginCapabilitiesResponse),
    Probe(ProbeResponse),
    CreateVolume(CreateVolumeResponse),
    ControllerPublishVolume(ControllerPublishVolumeResponse),
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesResponse),
    ListVolumes(ListVolumesResponse),
    GetCapacity(GetCapacityResponse),
    ControllerCapabilities(ControllerGetCapabilitiesResponse),
    ControllerExpandVolume(ControllerExpandVolumeResponse),
    NodeGetVolumeStats(NodeGetVolumeStatsResponse),
    NodeExpandVolume(NodeExpandVolumeResponse),
    NodeCapabilities(NodeGetCapabilitiesResponse),
    NodeInfo(NodeGetInfoResponse),
    /// Successful operation without a payload.
    Empty,
    /// Failed operation.
    Error(Status),
}

impl CsiResponse {
    /// Converts an error response into `Err`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`Status`] for [`CsiResponse::Error`].
    pub fn into_result(self) -> Result<Self, Status> {
        match self {
            Self::Error(status) => Err(status),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterless_request_has_no_params() {
        let json = serde_json::to_string(&CsiRequest::Probe).expect("serialise");
        assert_eq!(json, r#"{"method":"Probe"}"#);
    }

    #[test]
    fn request_parses_from_wire_shape() {
        let req: CsiRequest = serde_json::from_str(
            r#"{"method":"DeleteVolume","params":{"volume_id":"fr-par-1/abc"}}"#,
        )
        .expect("parse");
        assert_eq!(
            req,
            CsiRequest::DeleteVolume(DeleteVolumeRequest {
                volume_id: String::from("fr-par-1/abc"),
            })
        );
        assert_eq!(req.to_string(), "DeleteVolume");
    }

    #[test]
    fn error_response_converts_to_status() {
        let status = CsiResponse::Error(Status::not_found("gone"))
            .into_result()
            .expect_err("error");
        assert_eq!(status.code, crate::driver::Code::NotFound);
    }
}
