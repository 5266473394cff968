//! End-to-end calls over the plugin socket, backed by in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use scaleway_csi::backend::VolumeBackend;
use scaleway_csi::bootstrap::{self, BootstrapError, NodeHost};
use scaleway_csi::driver::Code;
use scaleway_csi::driver::types::{
    CapacityRange, CreateVolumeRequest, DeleteVolumeRequest, ProbeResponse, VolumeCapability,
};
use scaleway_csi::rpc::{CsiRequest, CsiResponse, RpcClient};
use scaleway_csi::test_support::{
    FixedStatsProvider, InMemoryVolumeBackend, RecordingMountExecutor,
};
use scaleway_csi::volume::BYTES_PER_GB;
use scaleway_csi::{LifecycleState, ReadinessGate, ServerId};
use tempfile::TempDir;
use tokio::sync::oneshot;

fn host() -> NodeHost {
    NodeHost {
        mounts: Arc::new(RecordingMountExecutor::new()),
        stats: Arc::new(FixedStatsProvider::new()),
    }
}

fn socket_in(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("csi.sock")).expect("utf8 temp path")
}

async fn connect(socket: &Utf8Path) -> RpcClient {
    for _ in 0..50 {
        if let Ok(client) = RpcClient::connect(socket).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket {socket} never came up");
}

#[tokio::test]
async fn serves_requests_until_shutdown() {
    let dir = TempDir::new().expect("tempdir");
    let socket = socket_in(&dir);
    let backend = Arc::new(InMemoryVolumeBackend::new());
    backend.add_server("42", "fsn1");
    let gate = ReadinessGate::new();

    let driver = bootstrap::start(
        Arc::clone(&backend) as Arc<dyn VolumeBackend>,
        &ServerId::new("42"),
        host(),
        &gate,
    )
    .await
    .expect("start");
    assert_eq!(gate.observer().state(), LifecycleState::Ready);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = bootstrap::serve(driver, &socket, &gate, async {
        stop_rx.await.ok();
    });

    let client = async {
        let mut client = connect(&socket).await;

        let probe = client.call(&CsiRequest::Probe).await.expect("probe");
        assert_eq!(probe, CsiResponse::Probe(ProbeResponse { ready: true }));

        let created = client
            .call(&CsiRequest::CreateVolume(CreateVolumeRequest {
                name: String::from("data"),
                capacity_range: Some(CapacityRange {
                    required_bytes: 10 * BYTES_PER_GB,
                    limit_bytes: 0,
                }),
                volume_capabilities: vec![VolumeCapability::mount("ext4")],
                ..CreateVolumeRequest::default()
            }))
            .await
            .expect("create");
        let CsiResponse::CreateVolume(created) = created else {
            panic!("unexpected response: {created:?}");
        };
        assert_eq!(created.volume.capacity_bytes, 10 * BYTES_PER_GB);

        let rejected = client
            .call(&CsiRequest::DeleteVolume(DeleteVolumeRequest::default()))
            .await
            .expect("delete call")
            .into_result()
            .expect_err("empty id is rejected");
        assert_eq!(rejected.code, Code::InvalidArgument);

        stop_tx.send(()).expect("server still running");
    };

    let (served, ()) = tokio::join!(server, client);
    served.expect("serve");

    assert_eq!(backend.volume_count(), 1);
    assert_eq!(gate.observer().state(), LifecycleState::ShuttingDown);
    assert!(!socket.exists(), "socket file removed on shutdown");
}

#[tokio::test]
async fn failed_handshake_keeps_plugin_starting() {
    let backend: Arc<dyn VolumeBackend> = Arc::new(InMemoryVolumeBackend::new());
    let gate = ReadinessGate::new();

    let Err(err) = bootstrap::start(backend, &ServerId::new("missing"), host(), &gate).await
    else {
        panic!("handshake should fail for an unknown server");
    };

    assert!(matches!(err, BootstrapError::Handshake { .. }), "{err:?}");
    assert_eq!(gate.observer().state(), LifecycleState::Starting);
}
