//! Status codes returned to the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::VolumeError;
use crate::mount::MountError;
use crate::stats::StatsError;

/// Status codes following the gRPC/CSI taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// The request is malformed.
    InvalidArgument,
    /// A referenced volume, server or path does not exist.
    NotFound,
    /// A conflicting object already exists.
    AlreadyExists,
    /// The system is not in a state that allows the operation.
    FailedPrecondition,
    /// A quota or per-node limit is exhausted.
    ResourceExhausted,
    /// A requested value lies outside the supported range.
    OutOfRange,
    /// The operation was aborted, typically because of a stale token.
    Aborted,
    /// The provider or a dependency could not be reached.
    Unavailable,
    /// A provider action did not finish in time.
    DeadlineExceeded,
    /// The operation is not supported.
    Unimplemented,
    /// An unexpected failure.
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::OutOfRange => "OutOfRange",
            Self::Aborted => "Aborted",
            Self::Unavailable => "Unavailable",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Error returned by every driver operation.
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    /// Machine-readable code.
    pub code: Code,
    /// Human-readable detail.
    pub message: String,
}

impl Status {
    /// Builds a status from a code and message.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for [`Code::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Shorthand for [`Code::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Shorthand for [`Code::FailedPrecondition`].
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    /// Shorthand for [`Code::ResourceExhausted`].
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// Shorthand for [`Code::OutOfRange`].
    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(Code::OutOfRange, message)
    }

    /// Shorthand for [`Code::Aborted`].
    #[must_use]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    /// Shorthand for [`Code::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}

impl From<VolumeError> for Status {
    fn from(err: VolumeError) -> Self {
        let code = match &err {
            VolumeError::VolumeAlreadyExists { .. } | VolumeError::IncompatibleExisting { .. } => {
                Code::AlreadyExists
            }
            VolumeError::VolumeNotFound(_) | VolumeError::ServerNotFound(_) => Code::NotFound,
            VolumeError::NotAttached { .. }
            | VolumeError::AlreadyAttachedElsewhere { .. }
            | VolumeError::LocationMismatch { .. } => Code::FailedPrecondition,
            VolumeError::AttachLimitReached { .. } => Code::ResourceExhausted,
            VolumeError::Timeout { .. } => Code::DeadlineExceeded,
            VolumeError::Unavailable(_) => Code::Unavailable,
            VolumeError::Provider { .. } => Code::Internal,
        };
        Self::new(code, err.to_string())
    }
}

impl From<MountError> for Status {
    fn from(err: MountError) -> Self {
        let code = match &err {
            MountError::DeviceNotFound { .. } => Code::NotFound,
            MountError::NotStaged { .. } => Code::FailedPrecondition,
            MountError::InvalidOptions(_) | MountError::UnsupportedFilesystem(_) => {
                Code::InvalidArgument
            }
            MountError::Command { .. } | MountError::Spawn(_) | MountError::Io { .. } => {
                Code::Internal
            }
        };
        Self::new(code, err.to_string())
    }
}

impl From<StatsError> for Status {
    fn from(err: StatsError) -> Self {
        let code = match &err {
            StatsError::NotFound(_) => Code::NotFound,
            StatsError::Io { .. } => Code::Internal,
        };
        Self::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::ServerId;
    use rstest::rstest;

    #[rstest]
    #[case(VolumeError::VolumeAlreadyExists { name: String::from("a") }, Code::AlreadyExists)]
    #[case(VolumeError::VolumeNotFound(String::from("1")), Code::NotFound)]
    #[case(VolumeError::ServerNotFound(String::from("1")), Code::NotFound)]
    #[case(
        VolumeError::AttachLimitReached { server_id: ServerId::new("1") },
        Code::ResourceExhausted
    )]
    #[case(
        VolumeError::Timeout { action: String::from("attach"), volume_id: String::from("1") },
        Code::DeadlineExceeded
    )]
    #[case(VolumeError::Unavailable(String::from("dns")), Code::Unavailable)]
    #[case(VolumeError::Provider { message: String::from("boom") }, Code::Internal)]
    fn volume_errors_map_to_codes(#[case] err: VolumeError, #[case] code: Code) {
        assert_eq!(Status::from(err).code, code);
    }

    #[test]
    fn status_serialises_code_in_screaming_case() {
        let json = serde_json::to_string(&Status::not_found("volume 1 not found"))
            .expect("serialise");
        assert_eq!(
            json,
            r#"{"code":"NOT_FOUND","message":"volume 1 not found"}"#
        );
    }
}
