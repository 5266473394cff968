//! A volume's full life on one node, with every step replayed the way an
//! orchestrator retries after a lost response.

#[path = "common/harness.rs"]
mod harness;

use harness::{Harness, STAGING, TARGET, TARGET_STATS, filesystem_capability};
use scaleway_csi::VolumeId;
use scaleway_csi::driver::types::{
    CapacityRange, ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
    CreateVolumeRequest, DeleteVolumeRequest, NodeGetVolumeStatsRequest,
    NodePublishVolumeRequest, NodeStageVolumeRequest, NodeUnpublishVolumeRequest,
    NodeUnstageVolumeRequest, UsageUnit,
};
use scaleway_csi::driver::DEVICE_PATH_KEY;
use scaleway_csi::mount::device_path;
use scaleway_csi::volume::BYTES_PER_GB;

const NODE_ID: &str = "42";

#[tokio::test]
async fn volume_lifecycle_survives_replayed_calls() {
    let h = Harness::new(NODE_ID, "fsn1");

    let create = CreateVolumeRequest {
        name: String::from("data"),
        capacity_range: Some(CapacityRange {
            required_bytes: 10 * BYTES_PER_GB,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![filesystem_capability()],
        ..CreateVolumeRequest::default()
    };
    let created = h.controller.create_volume(&create).await.expect("create");
    let replayed = h.controller.create_volume(&create).await.expect("replayed create");
    assert_eq!(created, replayed);
    assert_eq!(created.volume.capacity_bytes, 10 * BYTES_PER_GB);
    assert_eq!(h.backend.volume_count(), 1);
    let volume_id = created.volume.volume_id;

    let publish = ControllerPublishVolumeRequest {
        volume_id: volume_id.clone(),
        node_id: NODE_ID.to_owned(),
        volume_capability: Some(filesystem_capability()),
        readonly: false,
    };
    let context = h
        .controller
        .publish_volume(publish.clone())
        .await
        .expect("controller publish")
        .publish_context;
    h.controller
        .publish_volume(publish)
        .await
        .expect("replayed controller publish");
    assert_eq!(
        context.get(DEVICE_PATH_KEY).map(String::as_str),
        Some(device_path(&VolumeId::new(volume_id.as_str())).as_str())
    );
    assert_eq!(h.backend.attach_calls(), 1);

    let stage = NodeStageVolumeRequest {
        volume_id: volume_id.clone(),
        publish_context: context.clone(),
        staging_target_path: STAGING.to_owned(),
        volume_capability: Some(filesystem_capability()),
    };
    h.node.stage_volume(&stage).await.expect("stage");
    h.node.stage_volume(&stage).await.expect("replayed stage");

    let node_publish = NodePublishVolumeRequest {
        volume_id: volume_id.clone(),
        publish_context: context,
        staging_target_path: STAGING.to_owned(),
        target_path: TARGET.to_owned(),
        volume_capability: Some(filesystem_capability()),
        readonly: false,
    };
    h.node.publish_volume(&node_publish).await.expect("publish");
    h.node
        .publish_volume(&node_publish)
        .await
        .expect("replayed publish");

    let stats = h
        .node
        .get_volume_stats(&NodeGetVolumeStatsRequest {
            volume_id: volume_id.clone(),
            volume_path: TARGET.to_owned(),
        })
        .expect("stats");
    let bytes = stats
        .usage
        .iter()
        .find(|usage| usage.unit == UsageUnit::Bytes)
        .expect("byte usage");
    assert_eq!(bytes.used, TARGET_STATS.used_bytes);
    assert_eq!(bytes.total, TARGET_STATS.total_bytes);

    let node_unpublish = NodeUnpublishVolumeRequest {
        volume_id: volume_id.clone(),
        target_path: TARGET.to_owned(),
    };
    h.node
        .unpublish_volume(&node_unpublish)
        .await
        .expect("unpublish");
    h.node
        .unpublish_volume(&node_unpublish)
        .await
        .expect("replayed unpublish");

    let unstage = NodeUnstageVolumeRequest {
        volume_id: volume_id.clone(),
        staging_target_path: STAGING.to_owned(),
    };
    h.node.unstage_volume(&unstage).await.expect("unstage");
    h.node
        .unstage_volume(&unstage)
        .await
        .expect("replayed unstage");
    assert!(h.mounts.staged().is_empty());

    let unpublish = ControllerUnpublishVolumeRequest {
        volume_id: volume_id.clone(),
        node_id: NODE_ID.to_owned(),
    };
    h.controller
        .unpublish_volume(unpublish.clone())
        .await
        .expect("controller unpublish");
    h.controller
        .unpublish_volume(unpublish)
        .await
        .expect("replayed controller unpublish");
    assert!(h.backend.holders(&VolumeId::new(volume_id.as_str())).is_empty());

    let delete = DeleteVolumeRequest { volume_id };
    h.controller
        .delete_volume(delete.clone())
        .await
        .expect("delete");
    h.controller
        .delete_volume(delete)
        .await
        .expect("replayed delete");
    assert_eq!(h.backend.volume_count(), 0);
}
