//! Routes decoded requests to the identity, controller and node services.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use super::message::{CsiRequest, CsiResponse};
use crate::driver::{Code, ControllerService, IdentityService, NodeService, Status};

/// The services exposed on one plugin socket.
///
/// A plugin instance may run only the controller, only the node side, or
/// both; requests for a missing side answer `Unimplemented`.
pub struct CsiDriver {
    identity: IdentityService,
    controller: Option<Arc<ControllerService>>,
    node: Option<Arc<NodeService>>,
}

impl CsiDriver {
    /// Creates a driver with only the identity service.
    #[must_use]
    pub const fn new(identity: IdentityService) -> Self {
        Self {
            identity,
            controller: None,
            node: None,
        }
    }

    /// Adds the controller service.
    #[must_use]
    pub fn with_controller(mut self, controller: Arc<ControllerService>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Adds the node service.
    #[must_use]
    pub fn with_node(mut self, node: Arc<NodeService>) -> Self {
        self.node = Some(node);
        self
    }

    fn controller(&self) -> Result<&ControllerService, Status> {
        self.controller
            .as_deref()
            .ok_or_else(|| Status::new(Code::Unimplemented, "controller service not enabled"))
    }

    fn node(&self) -> Result<&NodeService, Status> {
        self.node
            .as_deref()
            .ok_or_else(|| Status::new(Code::Unimplemented, "node service not enabled"))
    }

    /// Executes one request and logs its outcome.
    pub async fn dispatch(&self, request: CsiRequest) -> CsiResponse {
        let method = request.method();
        let started = Instant::now();
        debug!(method, ?request, "request received");

        let response = self
            .route(request)
            .await
            .unwrap_or_else(CsiResponse::Error);

        let elapsed_ms = started.elapsed().as_millis();
        match &response {
            CsiResponse::Error(status) => {
                error!(
                    method,
                    code = %status.code,
                    message = %status.message,
                    elapsed_ms,
                    "request failed"
                );
            }
            other => debug!(method, response = ?other, elapsed_ms, "request completed"),
        }
        response
    }

    async fn route(&self, request: CsiRequest) -> Result<CsiResponse, Status> {
        let response = match request {
            CsiRequest::GetPluginInfo => CsiResponse::PluginInfo(self.identity.get_plugin_info()),
            CsiRequest::GetPluginCapabilities => {
                CsiResponse::PluginCapabilities(self.identity.get_plugin_capabilities())
            }
            CsiRequest::Probe => CsiResponse::Probe(self.identity.probe()),

            CsiRequest::CreateVolume(req) => {
                CsiResponse::CreateVolume(self.controller()?.create_volume(&req).await?)
            }
            CsiRequest::DeleteVolume(req) => {
                self.controller()?.delete_volume(req).await?;
                CsiResponse::Empty
            }
            CsiRequest::ControllerPublishVolume(req) => {
                CsiResponse::ControllerPublishVolume(self.controller()?.publish_volume(req).await?)
            }
            CsiRequest::ControllerUnpublishVolume(req) => {
                self.controller()?.unpublish_volume(req).await?;
                CsiResponse::Empty
            }
            CsiRequest::ValidateVolumeCapabilities(req) => CsiResponse::ValidateVolumeCapabilities(
                self.controller()?.validate_volume_capabilities(req).await?,
            ),
            CsiRequest::ListVolumes(req) => {
                CsiResponse::ListVolumes(self.controller()?.list_volumes(&req).await?)
            }
            CsiRequest::GetCapacity(req) => {
                CsiResponse::GetCapacity(self.controller()?.get_capacity(&req))
            }
            CsiRequest::ControllerGetCapabilities => {
                CsiResponse::ControllerCapabilities(self.controller()?.get_capabilities())
            }
            CsiRequest::ControllerExpandVolume(req) => {
                CsiResponse::ControllerExpandVolume(self.controller()?.expand_volume(req).await?)
            }

            CsiRequest::NodeStageVolume(req) => {
                self.node()?.stage_volume(&req).await?;
                CsiResponse::Empty
            }
            CsiRequest::NodeUnstageVolume(req) => {
                self.node()?.unstage_volume(&req).await?;
                CsiResponse::Empty
            }
            CsiRequest::NodePublishVolume(req) => {
                self.node()?.publish_volume(&req).await?;
                CsiResponse::Empty
            }
            CsiRequest::NodeUnpublishVolume(req) => {
                self.node()?.unpublish_volume(&req).await?;
                CsiResponse::Empty
            }
            CsiRequest::NodeGetVolumeStats(req) => {
                CsiResponse::NodeGetVolumeStats(self.node()?.get_volume_stats(&req)?)
            }
            CsiRequest::NodeExpandVolume(req) => {
                CsiResponse::NodeExpandVolume(self.node()?.expand_volume(&req).await?)
            }
            CsiRequest::NodeGetCapabilities => {
                CsiResponse::NodeCapabilities(self.node()?.get_capabilities())
            }
            CsiRequest::NodeGetInfo => CsiResponse::NodeInfo(self.node()?.get_info()),
        };
        Ok(response)
    }
}
