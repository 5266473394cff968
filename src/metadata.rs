//! Instance metadata lookup used to discover which server the plugin runs on.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::volume::ServerId;

/// Metadata endpoint reachable from every Scaleway instance.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.42.42/conf?format=json";

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while querying the metadata service.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MetadataError {
    /// Raised when the service cannot be reached or answers with an error.
    #[error("metadata request to {url} failed: {message}")]
    Request {
        /// Endpoint queried.
        url: String,
        /// Transport or status message.
        message: String,
    },
    /// Raised when the response lacks a field the plugin needs.
    #[error("metadata response is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct MetadataLocation {
    #[serde(default)]
    zone_id: String,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    id: String,
    location: Option<MetadataLocation>,
}

/// Identity of the instance, as reported by the metadata service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceIdentity {
    /// Zone-qualified server identifier (`<zone>/<uuid>`).
    pub server_id: ServerId,
    /// Zone the instance runs in.
    pub zone: String,
}

impl InstanceIdentity {
    /// Parses a metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Malformed`] when the document is not JSON or
    /// lacks the server id or zone.
    pub fn from_json(body: &[u8]) -> Result<Self, MetadataError> {
        let document: MetadataDocument =
            serde_json::from_slice(body).map_err(|err| MetadataError::Malformed(err.to_string()))?;
        let id = document.id.trim();
        if id.is_empty() {
            return Err(MetadataError::Malformed(String::from("missing id")));
        }
        let zone = document
            .location
            .map(|location| location.zone_id.trim().to_owned())
            .filter(|zone| !zone.is_empty())
            .ok_or_else(|| MetadataError::Malformed(String::from("missing location.zone_id")))?;
        Ok(Self {
            server_id: ServerId::new(format!("{zone}/{id}")),
            zone,
        })
    }
}

impl InstanceIdentity {
    /// Identity from an operator-supplied server id. A bare id is placed in
    /// `default_zone`; a `<zone>/<id>` value keeps its own zone.
    #[must_use]
    pub fn from_configured(raw: &str, default_zone: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.split_once('/') {
            Some((zone, _)) => Self {
                server_id: ServerId::new(trimmed),
                zone: zone.to_owned(),
            },
            None => Self {
                server_id: ServerId::new(format!("{default_zone}/{trimmed}")),
                zone: default_zone.to_owned(),
            },
        }
    }
}

/// Queries the metadata service at `url`.
///
/// # Errors
///
/// Returns [`MetadataError::Request`] when the endpoint cannot be reached or
/// answers with a non-success status, and [`MetadataError::Malformed`] when
/// the document cannot be parsed.
#[instrument]
pub async fn fetch_identity(url: &str) -> Result<InstanceIdentity, MetadataError> {
    let request_error = |message: String| MetadataError::Request {
        url: url.to_owned(),
        message,
    };
    let response = reqwest::Client::new()
        .get(url)
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(|err| request_error(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(request_error(format!("status {status}")));
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| request_error(err.to_string()))?;
    let identity = InstanceIdentity::from_json(&body)?;
    debug!(server_id = %identity.server_id, zone = %identity.zone, "instance identity resolved");
    Ok(identity)
}
