//! Classification of Instance API failures into semantic volume errors.

use reqwest::StatusCode;
use scaleway_rs::ScalewayError;

use super::types::ApiErrorBody;
use crate::backend::VolumeError;
use crate::volume::ServerId;

/// Semantic reading of a failed Instance API call, before the caller adds
/// the identifiers it knows about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum ApiFailure {
    /// The API answered 404 for a server resource.
    ServerNotFound,
    /// The API answered 404 for anything else.
    VolumeNotFound,
    /// The server cannot take another volume.
    AttachLimit,
    /// The volume is held by some server.
    AlreadyAttached,
    /// The API or the network is not answering.
    Unavailable(String),
    /// Anything the plugin cannot reconcile.
    Other(String),
}

impl ApiFailure {
    /// Classifies a non-success HTTP response.
    pub(super) fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let error: ApiErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let message = if error.message.is_empty() {
            String::from_utf8_lossy(body).trim().to_owned()
        } else {
            error.message.clone()
        };

        if status == StatusCode::NOT_FOUND {
            let is_server = error
                .resource
                .as_deref()
                .is_some_and(|resource| resource.contains("server"));
            return if is_server {
                Self::ServerNotFound
            } else {
                Self::VolumeNotFound
            };
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Self::Unavailable(format!("{status}: {message}"));
        }

        let lower = message.to_ascii_lowercase();
        if lower.contains("already attached") {
            return Self::AlreadyAttached;
        }
        let mentions_limit = ["limit", "maximum", "too many"]
            .iter()
            .any(|needle| lower.contains(needle));
        if lower.contains("volume") && mentions_limit {
            return Self::AttachLimit;
        }
        if error.etype.is_empty() {
            Self::Other(format!("{status}: {message}"))
        } else {
            Self::Other(format!("{status} {}: {message}", error.etype))
        }
    }

    /// Classifies a failure to get any response at all.
    pub(super) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }

    /// Converts into a [`VolumeError`] about `volume_id`, and about
    /// `server_id` for calls that target a server.
    ///
    /// `AlreadyAttached` is reconciled by the attach path, which knows the
    /// holder; anywhere else it is reported as a provider failure.
    pub(super) fn into_volume_error(self, volume_id: &str, server_id: Option<&str>) -> VolumeError {
        match (self, server_id) {
            (Self::ServerNotFound, Some(server)) => VolumeError::ServerNotFound(server.to_owned()),
            (Self::VolumeNotFound | Self::ServerNotFound, _) => {
                VolumeError::VolumeNotFound(volume_id.to_owned())
            }
            (Self::AttachLimit, Some(server)) => VolumeError::AttachLimitReached {
                server_id: ServerId::new(server),
            },
            (Self::AttachLimit, None) => VolumeError::Provider {
                message: format!("volume limit reached while handling {volume_id}"),
            },
            (Self::AlreadyAttached, _) => VolumeError::Provider {
                message: format!("volume {volume_id} is already attached"),
            },
            (Self::Unavailable(message), _) => VolumeError::Unavailable(message),
            (Self::Other(message), _) => VolumeError::Provider { message },
        }
    }
}

/// Maps SDK errors raised by server lookups.
pub(super) fn server_lookup_error(id: &str, err: ScalewayError) -> VolumeError {
    match err {
        ScalewayError::Api(api_err)
            if api_err.etype == "unknown_resource"
                || api_err.message.to_ascii_lowercase().contains("not found") =>
        {
            VolumeError::ServerNotFound(id.to_owned())
        }
        other => VolumeError::Provider {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::volume_404(
        StatusCode::NOT_FOUND,
        r#"{"type":"unknown_resource","message":"not found","resource":"instance_volume"}"#,
        ApiFailure::VolumeNotFound
    )]
    #[case::server_404(
        StatusCode::NOT_FOUND,
        r#"{"type":"unknown_resource","message":"not found","resource":"instance_server"}"#,
        ApiFailure::ServerNotFound
    )]
    #[case::bare_404(StatusCode::NOT_FOUND, "", ApiFailure::VolumeNotFound)]
    #[case::limit(
        StatusCode::BAD_REQUEST,
        r#"{"type":"invalid_request_error","message":"Maximum number of volumes reached"}"#,
        ApiFailure::AttachLimit
    )]
    #[case::too_many(
        StatusCode::BAD_REQUEST,
        r#"{"message":"too many volumes attached to this server"}"#,
        ApiFailure::AttachLimit
    )]
    #[case::already_attached(
        StatusCode::BAD_REQUEST,
        r#"{"message":"volume is already attached to a server"}"#,
        ApiFailure::AlreadyAttached
    )]
    fn classifies_semantic_failures(
        #[case] status: StatusCode,
        #[case] body: &str,
        #[case] expected: ApiFailure,
    ) {
        assert_eq!(ApiFailure::from_response(status, body.as_bytes()), expected);
    }

    #[test]
    fn server_errors_are_unavailable() {
        let failure =
            ApiFailure::from_response(StatusCode::SERVICE_UNAVAILABLE, b"upstream timeout");
        assert!(matches!(failure, ApiFailure::Unavailable(message) if message.contains("upstream")));
    }

    #[test]
    fn unknown_errors_keep_the_provider_message() {
        let failure = ApiFailure::from_response(
            StatusCode::BAD_REQUEST,
            br#"{"type":"invalid_arguments","message":"size must be a multiple of 1GB"}"#,
        );
        let err = failure.into_volume_error("fr-par-1/abc", None);
        assert_eq!(
            err,
            VolumeError::Provider {
                message: String::from(
                    "400 Bad Request invalid_arguments: size must be a multiple of 1GB"
                ),
            }
        );
    }

    #[test]
    fn not_found_names_the_missing_resource() {
        let volume = ApiFailure::VolumeNotFound.into_volume_error("fr-par-1/abc", Some("fr-par-1/srv"));
        assert_eq!(volume, VolumeError::VolumeNotFound(String::from("fr-par-1/abc")));
        let server = ApiFailure::ServerNotFound.into_volume_error("fr-par-1/abc", Some("fr-par-1/srv"));
        assert_eq!(server, VolumeError::ServerNotFound(String::from("fr-par-1/srv")));
    }

    #[test]
    fn attach_limit_names_the_server() {
        let err = ApiFailure::AttachLimit.into_volume_error("fr-par-1/abc", Some("fr-par-1/srv"));
        assert_eq!(
            err,
            VolumeError::AttachLimitReached {
                server_id: ServerId::new("fr-par-1/srv"),
            }
        );
    }
}
