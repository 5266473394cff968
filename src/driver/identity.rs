//! Identity service: plugin name, capabilities and readiness.

use super::types::{
    GetPluginCapabilitiesResponse, GetPluginInfoResponse, PluginCapability, ProbeResponse,
};
use super::{PLUGIN_NAME, PLUGIN_VERSION};
use crate::lifecycle::ReadinessObserver;

/// Reports plugin metadata and readiness.
#[derive(Clone, Debug)]
pub struct IdentityService {
    readiness: ReadinessObserver,
}

impl IdentityService {
    /// Creates an identity service observing `readiness`.
    #[must_use]
    pub const fn new(readiness: ReadinessObserver) -> Self {
        Self { readiness }
    }

    /// Plugin name and version.
    #[must_use]
    pub fn get_plugin_info(&self) -> GetPluginInfoResponse {
        GetPluginInfoResponse {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: PLUGIN_VERSION.to_owned(),
        }
    }

    /// Plugin-level capabilities.
    #[must_use]
    pub fn get_plugin_capabilities(&self) -> GetPluginCapabilitiesResponse {
        GetPluginCapabilitiesResponse {
            capabilities: vec![
                PluginCapability::ControllerService,
                PluginCapability::VolumeAccessibilityConstraints,
                PluginCapability::OnlineVolumeExpansion,
            ],
        }
    }

    /// Current readiness.
    #[must_use]
    pub fn probe(&self) -> ProbeResponse {
        ProbeResponse {
            ready: self.readiness.is_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReadinessGate;

    #[test]
    fn probe_reflects_gate() {
        let gate = ReadinessGate::new();
        let identity = IdentityService::new(gate.observer());
        assert!(!identity.probe().ready);
        gate.mark_ready();
        assert!(identity.probe().ready);
    }

    #[test]
    fn plugin_info_names_the_driver() {
        let gate = ReadinessGate::new();
        let info = IdentityService::new(gate.observer()).get_plugin_info();
        assert_eq!(info.name, "csi.scaleway.com");
        assert!(!info.vendor_version.is_empty());
    }
}
