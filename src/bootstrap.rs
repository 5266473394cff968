//! Process bootstrap: node identity, startup handshake and serving.
//!
//! The readiness gate stays in `Starting` until the plugin has looked up its
//! own server through the backend. A failed handshake aborts startup so an
//! orchestrator never sees a ready plugin that cannot reach the cloud API.

use std::future::Future;
use std::sync::Arc;

use camino::Utf8Path;
use thiserror::Error;
use tracing::{info, instrument};

use crate::backend::{VolumeBackend, VolumeError};
use crate::config::{ConfigError, DriverConfig};
use crate::driver::{ControllerService, IdentityService, NodeService};
use crate::idempotent::IdempotentVolumeService;
use crate::lifecycle::ReadinessGate;
use crate::metadata::{InstanceIdentity, MetadataError, fetch_identity};
use crate::mount::MountExecutor;
use crate::rpc::{CsiDriver, RpcServer, TransportError};
use crate::stats::StatsProvider;
use crate::volume::ServerId;

/// Errors that stop the plugin from starting or serving.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Raised when configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the metadata service cannot identify the local server.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Raised when the plugin cannot look up its own server.
    #[error("startup handshake failed for server {server_id}: {source}")]
    Handshake {
        /// Server looked up.
        server_id: ServerId,
        /// Backend failure.
        #[source]
        source: VolumeError,
    },
    /// Raised when the socket cannot be served.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Local collaborators of the node service.
pub struct NodeHost {
    /// Mount executor for this node.
    pub mounts: Arc<dyn MountExecutor>,
    /// Filesystem statistics for this node.
    pub stats: Arc<dyn StatsProvider>,
}

/// Identity of the local server: the configured override, qualified with
/// `default_zone` when it has no zone, or the metadata service's answer.
///
/// # Errors
///
/// Returns [`BootstrapError::Metadata`] when the metadata lookup fails.
pub async fn resolve_identity(
    config: &DriverConfig,
    default_zone: &str,
) -> Result<InstanceIdentity, BootstrapError> {
    if let Some(id) = config.server_id_override() {
        let identity = InstanceIdentity::from_configured(id, default_zone);
        info!(server_id = %identity.server_id, "using configured server id");
        return Ok(identity);
    }
    Ok(fetch_identity(&config.metadata_url).await?)
}

/// Performs the startup handshake and assembles the services, marking
/// `gate` ready on success.
///
/// # Errors
///
/// Returns [`BootstrapError::Handshake`] when the local server cannot be
/// looked up; `gate` is left untouched.
#[instrument(skip_all, fields(server_id = %server_id))]
pub async fn start(
    backend: Arc<dyn VolumeBackend>,
    server_id: &ServerId,
    host: NodeHost,
    gate: &ReadinessGate,
) -> Result<CsiDriver, BootstrapError> {
    let volumes = Arc::new(IdempotentVolumeService::new(backend));
    let server = volumes
        .get_server(server_id)
        .await
        .map_err(|source| BootstrapError::Handshake {
            server_id: server_id.clone(),
            source,
        })?;
    info!(location = %server.location, "startup handshake succeeded");

    let controller = ControllerService::new(Arc::clone(&volumes), server.location.clone());
    let node = NodeService::new(server, host.mounts, host.stats);
    let driver = CsiDriver::new(IdentityService::new(gate.observer()))
        .with_controller(Arc::new(controller))
        .with_node(Arc::new(node));

    gate.mark_ready();
    Ok(driver)
}

/// Serves `driver` on `socket` until `shutdown` resolves, then moves `gate`
/// to `ShuttingDown`.
///
/// # Errors
///
/// Returns [`BootstrapError::Transport`] when the socket cannot be bound or
/// cleaned up.
pub async fn serve<F>(
    driver: CsiDriver,
    socket: &Utf8Path,
    gate: &ReadinessGate,
    shutdown: F,
) -> Result<(), BootstrapError>
where
    F: Future<Output = ()>,
{
    let server = RpcServer::bind(socket, Arc::new(driver))?;
    let stopping = async {
        shutdown.await;
        gate.mark_shutting_down();
    };
    server.serve_until(stopping).await?;
    info!("plugin stopped");
    Ok(())
}
