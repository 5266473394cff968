//! Orchestrator-facing services: controller, node and identity.

mod controller;
mod error;
mod identity;
mod node;
pub mod types;

pub use controller::ControllerService;
pub use error::{Code, Status};
pub use identity::IdentityService;
pub use node::NodeService;

use crate::volume::{BYTES_PER_GB, gb_ceil, gb_floor};
use types::CapacityRange;

/// Name reported by `GetPluginInfo`.
pub const PLUGIN_NAME: &str = "csi.scaleway.com";

/// Version reported by `GetPluginInfo`.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of volumes a single node may hold.
pub const MAX_VOLUMES_PER_NODE: u64 = 16;

/// Smallest volume the provider creates, in gigabytes.
pub const MIN_VOLUME_SIZE_GB: u64 = 10;

/// Size used when the caller does not request one, in gigabytes.
pub const DEFAULT_VOLUME_SIZE_GB: u64 = MIN_VOLUME_SIZE_GB;

/// Topology segment key carrying the zone.
pub const TOPOLOGY_ZONE_KEY: &str = "topology.csi.scaleway.com/zone";

/// Publish context key carrying the device path.
pub const DEVICE_PATH_KEY: &str = "devicePath";

/// Resolves a capacity range to `(min, max)` gigabytes, where `max == 0`
/// means unbounded.
///
/// # Errors
///
/// Returns [`Code::OutOfRange`] when the limit is below the provider minimum
/// or below the required size.
pub fn volume_size_gb(requested: Option<&CapacityRange>) -> Result<(u64, u64), Status> {
    let range = requested.copied().unwrap_or_default();
    let required = match gb_ceil(range.required_bytes) {
        0 => DEFAULT_VOLUME_SIZE_GB,
        gb => gb,
    };
    let min = required.max(MIN_VOLUME_SIZE_GB);
    if range.limit_bytes == 0 {
        return Ok((min, 0));
    }

    let limit = gb_floor(range.limit_bytes);
    if limit < MIN_VOLUME_SIZE_GB {
        return Err(Status::out_of_range(format!(
            "limit of {} bytes is below the minimum volume size of {} bytes",
            range.limit_bytes,
            MIN_VOLUME_SIZE_GB * BYTES_PER_GB
        )));
    }
    if required > limit {
        return Err(Status::out_of_range(format!(
            "required {} bytes exceeds limit of {} bytes",
            range.required_bytes, range.limit_bytes
        )));
    }
    Ok((min, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const GB: u64 = BYTES_PER_GB;

    #[rstest]
    #[case(0, 0, (10, 0))]
    #[case(1, 0, (10, 0))]
    #[case(25 * GB + 1, 0, (26, 0))]
    #[case(0, 50 * GB + 500_000_000, (10, 50))]
    #[case(20 * GB, 20 * GB, (20, 20))]
    fn sizes_are_rounded(#[case] required: u64, #[case] limit: u64, #[case] expected: (u64, u64)) {
        let range = CapacityRange {
            required_bytes: required,
            limit_bytes: limit,
        };
        assert_eq!(volume_size_gb(Some(&range)).expect("size"), expected);
    }

    #[rstest]
    #[case(0, 5 * GB)]
    #[case(30 * GB, 20 * GB)]
    #[case(0, 1)]
    fn invalid_ranges_are_out_of_range(#[case] required: u64, #[case] limit: u64) {
        let range = CapacityRange {
            required_bytes: required,
            limit_bytes: limit,
        };
        let err = volume_size_gb(Some(&range)).expect_err("out of range");
        assert_eq!(err.code, Code::OutOfRange);
    }

    #[test]
    fn missing_range_uses_default() {
        assert_eq!(volume_size_gb(None).expect("size"), (DEFAULT_VOLUME_SIZE_GB, 0));
    }
}
