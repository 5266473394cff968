//! Wire types for the Instance API volume endpoints and zoned identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::volume::{ServerId, Volume, VolumeId, gb_floor};

/// Volume type requested for every volume the plugin creates.
pub(super) const VOLUME_TYPE: &str = "b_ssd";

/// Terminal volume state after create, attach, detach and resize.
pub(super) const STATE_AVAILABLE: &str = "available";

/// Volume state reported when the provider gives up on an action.
pub(super) const STATE_ERROR: &str = "error";

/// A provider identifier qualified by the zone it lives in.
///
/// Scaleway identifiers are only unique within a zone, so the plugin encodes
/// volume and server ids as `<zone>/<uuid>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ZonedId {
    pub(crate) zone: String,
    pub(crate) uuid: Uuid,
}

impl ZonedId {
    /// Parses `<zone>/<uuid>`; returns `None` for anything else.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let (zone, raw_uuid) = raw.trim().split_once('/')?;
        if zone.is_empty() {
            return None;
        }
        let uuid = Uuid::parse_str(raw_uuid).ok()?;
        Some(Self {
            zone: zone.to_owned(),
            uuid,
        })
    }
}

impl fmt::Display for ZonedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.uuid)
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CreateVolumeBody<'a> {
    pub(super) name: &'a str,
    pub(super) project: &'a str,
    pub(super) volume_type: &'static str,
    pub(super) size: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct ResizeVolumeBody {
    pub(super) size: u64,
}

/// Body of `attach-volume` and `detach-volume`.
#[derive(Debug, Serialize)]
pub(super) struct VolumeRefBody<'a> {
    pub(super) volume_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumeEnvelope {
    pub(super) volume: ApiVolume,
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumeListPage {
    #[serde(default)]
    pub(super) volumes: Vec<ApiVolume>,
    #[serde(default)]
    pub(super) total_count: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiServerRef {
    pub(super) id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiVolume {
    pub(super) id: String,
    pub(super) name: String,
    /// Size in bytes.
    pub(super) size: u64,
    pub(super) zone: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default)]
    pub(super) server: Option<ApiServerRef>,
}

impl ApiVolume {
    pub(super) fn is_available(&self) -> bool {
        self.state == STATE_AVAILABLE
    }

    pub(super) fn is_failed(&self) -> bool {
        self.state == STATE_ERROR
    }

    pub(super) fn into_volume(self) -> Volume {
        let server = self
            .server
            .map(|server| ServerId::new(format!("{}/{}", self.zone, server.id)));
        Volume {
            id: VolumeId::new(format!("{}/{}", self.zone, self.id)),
            name: self.name,
            size_gb: gb_floor(self.size),
            location: self.zone,
            server,
        }
    }
}

/// Error document returned by the Instance API.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiErrorBody {
    #[serde(default)]
    pub(super) message: String,
    #[serde(default, rename = "type")]
    pub(super) etype: String,
    #[serde(default)]
    pub(super) resource: Option<String>,
}
