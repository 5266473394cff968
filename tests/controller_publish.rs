//! ControllerPublishVolume failures and the status codes they surface as.

#[path = "common/harness.rs"]
mod harness;

use harness::{Harness, filesystem_capability};
use rstest::{fixture, rstest};
use scaleway_csi::driver::Code;
use scaleway_csi::driver::types::{
    CapacityRange, ControllerPublishVolumeRequest, CreateVolumeRequest,
};
use scaleway_csi::volume::BYTES_PER_GB;
use scaleway_csi::{ServerId, VolumeError, VolumeId};

const NODE_ID: &str = "42";

struct Published {
    h: Harness,
    volume_id: String,
}

#[fixture]
async fn created() -> Published {
    let h = Harness::new(NODE_ID, "fsn1");
    let created = h
        .controller
        .create_volume(&CreateVolumeRequest {
            name: String::from("data"),
            capacity_range: Some(CapacityRange {
                required_bytes: 10 * BYTES_PER_GB,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![filesystem_capability()],
            ..CreateVolumeRequest::default()
        })
        .await
        .expect("create");
    Published {
        h,
        volume_id: created.volume.volume_id,
    }
}

fn publish(volume_id: &str, node_id: &str) -> ControllerPublishVolumeRequest {
    ControllerPublishVolumeRequest {
        volume_id: volume_id.to_owned(),
        node_id: node_id.to_owned(),
        volume_capability: Some(filesystem_capability()),
        readonly: false,
    }
}

#[rstest]
#[tokio::test]
async fn unknown_volume_is_not_found(#[future] created: Published) {
    let Published { h, .. } = created.await;

    let err = h
        .controller
        .publish_volume(publish("vol-missing", NODE_ID))
        .await
        .expect_err("unknown volume");

    assert_eq!(err.code, Code::NotFound, "{err:?}");
    assert_eq!(h.backend.attach_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn unknown_server_is_not_found(#[future] created: Published) {
    let Published { h, volume_id } = created.await;

    let err = h
        .controller
        .publish_volume(publish(&volume_id, "99"))
        .await
        .expect_err("unknown server");

    assert_eq!(err.code, Code::NotFound, "{err:?}");
    assert!(h.backend.holders(&VolumeId::new(volume_id)).is_empty());
}

#[rstest]
#[tokio::test]
async fn server_in_another_zone_fails_precondition(#[future] created: Published) {
    let Published { h, volume_id } = created.await;
    h.backend.add_server("7", "nbg1");

    let err = h
        .controller
        .publish_volume(publish(&volume_id, "7"))
        .await
        .expect_err("zone mismatch");

    assert_eq!(err.code, Code::FailedPrecondition, "{err:?}");
    assert!(err.message.contains("nbg1"), "{}", err.message);
    assert_eq!(h.backend.attach_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn attach_limit_is_resource_exhausted(#[future] created: Published) {
    let Published { h, volume_id } = created.await;
    h.backend.fail_attach_with(VolumeError::AttachLimitReached {
        server_id: ServerId::new(NODE_ID),
    });

    let err = h
        .controller
        .publish_volume(publish(&volume_id, NODE_ID))
        .await
        .expect_err("attach limit");

    assert_eq!(err.code, Code::ResourceExhausted, "{err:?}");
    assert!(h.backend.holders(&VolumeId::new(volume_id)).is_empty());
}

#[rstest]
#[tokio::test]
async fn concurrent_publishes_attach_once(#[future] created: Published) {
    let Published { h, volume_id } = created.await;

    let (first, second) = tokio::join!(
        h.controller.publish_volume(publish(&volume_id, NODE_ID)),
        h.controller.publish_volume(publish(&volume_id, NODE_ID))
    );

    assert_eq!(first.expect("first"), second.expect("second"));
    assert_eq!(h.backend.attach_calls(), 1);
    assert_eq!(
        h.backend.holders(&VolumeId::new(volume_id)),
        vec![ServerId::new(NODE_ID)]
    );
}
