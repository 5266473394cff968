//! Volume and server data model shared by the backend, the idempotency layer
//! and the driver services.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Bytes in one provider gigabyte. Scaleway sizes volumes in decimal units.
pub const BYTES_PER_GB: u64 = 1_000_000_000;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier, trimming surrounding whitespace.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into().trim().to_owned())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Returns `true` when the identifier is blank.
            #[must_use]
            pub const fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Backend-assigned volume identifier.
    VolumeId
);
newtype!(
    /// Backend-assigned server (node) identifier.
    ServerId
);

/// Remote state of a block volume as reported by the backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Unique, immutable identifier.
    pub id: VolumeId,
    /// Caller-assigned name used as the idempotency key for creation.
    pub name: String,
    /// Size in gigabytes.
    pub size_gb: u64,
    /// Placement domain (zone) the volume lives in.
    pub location: String,
    /// Server the volume is attached to, if any.
    pub server: Option<ServerId>,
}

impl Volume {
    /// Returns `true` when the volume is attached to `server`.
    #[must_use]
    pub fn is_attached_to(&self, server: &ServerId) -> bool {
        self.server.as_ref() == Some(server)
    }

    /// Size of the volume in bytes, saturating on overflow.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_gb.saturating_mul(BYTES_PER_GB)
    }
}

/// A compute server that volumes can be attached to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Unique, immutable identifier.
    pub id: ServerId,
    /// Placement domain (zone) of the server.
    pub location: String,
}

/// Parameters for creating a volume and for validating an existing volume of
/// the same name on replay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateOptions {
    /// Volume name.
    pub name: String,
    /// Minimum acceptable size in gigabytes. New volumes are created with
    /// exactly this size.
    pub min_size_gb: u64,
    /// Maximum acceptable size in gigabytes; zero means unbounded.
    pub max_size_gb: u64,
    /// Target placement domain.
    pub location: String,
}

impl CreateOptions {
    /// Creates options, trimming string fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        min_size_gb: u64,
        max_size_gb: u64,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            min_size_gb,
            max_size_gb,
            location: location.into().trim().to_owned(),
        }
    }

    /// Describes why `existing` cannot stand in for a volume created with
    /// these options, or `None` when it is compatible.
    #[must_use]
    pub fn incompatibility(&self, existing: &Volume) -> Option<Incompatibility> {
        if existing.size_gb < self.min_size_gb {
            return Some(Incompatibility::TooSmall {
                actual: existing.size_gb,
                min: self.min_size_gb,
            });
        }
        if self.max_size_gb > 0 && existing.size_gb > self.max_size_gb {
            return Some(Incompatibility::TooLarge {
                actual: existing.size_gb,
                max: self.max_size_gb,
            });
        }
        if existing.location != self.location {
            return Some(Incompatibility::Location {
                actual: existing.location.clone(),
                requested: self.location.clone(),
            });
        }
        None
    }
}

/// Reason an existing volume does not match a creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Incompatibility {
    /// The existing volume is smaller than the requested minimum.
    TooSmall {
        /// Existing size in gigabytes.
        actual: u64,
        /// Requested minimum in gigabytes.
        min: u64,
    },
    /// The existing volume exceeds the requested maximum.
    TooLarge {
        /// Existing size in gigabytes.
        actual: u64,
        /// Requested maximum in gigabytes.
        max: u64,
    },
    /// The existing volume lives in another location.
    Location {
        /// Location of the existing volume.
        actual: String,
        /// Requested location.
        requested: String,
    },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { actual, min } => {
                write!(f, "existing volume is too small ({actual} GB < {min} GB)")
            }
            Self::TooLarge { actual, max } => {
                write!(f, "existing volume is too large ({actual} GB > {max} GB)")
            }
            Self::Location { actual, requested } => write!(
                f,
                "existing volume is in location {actual}, requested {requested}"
            ),
        }
    }
}

/// How a volume is presented to the workload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccessKind {
    /// The raw block device is exposed.
    Block,
    /// The device carries a filesystem that is mounted.
    Filesystem {
        /// Filesystem type, for example `ext4`.
        fs_type: String,
    },
}

/// Mount parameters passed through to the mount executor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountOptions {
    /// Block or filesystem access.
    pub access: AccessKind,
    /// Additional mount flags (for example `noatime`).
    pub flags: Vec<String>,
    /// Whether the mount must be read-only.
    pub read_only: bool,
}

impl MountOptions {
    /// Filesystem access with the given type and no flags.
    #[must_use]
    pub fn filesystem(fs_type: impl Into<String>) -> Self {
        Self {
            access: AccessKind::Filesystem {
                fs_type: fs_type.into(),
            },
            flags: Vec::new(),
            read_only: false,
        }
    }

    /// Raw block access.
    #[must_use]
    pub const fn block() -> Self {
        Self {
            access: AccessKind::Block,
            flags: Vec::new(),
            read_only: false,
        }
    }

    /// Returns `true` for raw block access.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self.access, AccessKind::Block)
    }

    /// Filesystem type for filesystem access.
    #[must_use]
    pub const fn fs_type(&self) -> Option<&str> {
        match &self.access {
            AccessKind::Block => None,
            AccessKind::Filesystem { fs_type } => Some(fs_type.as_str()),
        }
    }
}

/// Capacity and usage of a mounted filesystem.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
    /// Total size in bytes.
    pub total_bytes: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Total inodes.
    pub total_inodes: u64,
    /// Inodes in use.
    pub used_inodes: u64,
    /// Free inodes.
    pub free_inodes: u64,
}

/// Converts a byte count to whole gigabytes, rounding up.
#[must_use]
pub const fn gb_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_GB)
}

/// Converts a byte count to whole gigabytes, rounding down.
#[must_use]
pub const fn gb_floor(bytes: u64) -> u64 {
    bytes.div_euclid(BYTES_PER_GB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn volume(size_gb: u64, location: &str) -> Volume {
        Volume {
            id: VolumeId::new("1"),
            name: String::from("data"),
            size_gb,
            location: location.to_owned(),
            server: None,
        }
    }

    #[test]
    fn ids_trim_whitespace() {
        let id = VolumeId::new("  fr-par-1/abc ");
        assert_eq!(id.as_str(), "fr-par-1/abc");
        assert!(ServerId::new("   ").is_empty());
    }

    #[rstest]
    #[case(10, 10, 0, "fsn1", None)]
    #[case(5, 10, 0, "fsn1", Some("too small"))]
    #[case(50, 10, 20, "fsn1", Some("too large"))]
    #[case(15, 10, 20, "nbg1", Some("location"))]
    fn incompatibility_detects_mismatches(
        #[case] existing_size: u64,
        #[case] min: u64,
        #[case] max: u64,
        #[case] location: &str,
        #[case] expected: Option<&str>,
    ) {
        let opts = CreateOptions::new("data", min, max, "fsn1");
        let outcome = opts.incompatibility(&volume(existing_size, location));
        match expected {
            None => assert_eq!(outcome, None),
            Some(fragment) => {
                let message = outcome
                    .map(|reason| reason.to_string())
                    .unwrap_or_default();
                assert!(message.contains(fragment), "unexpected: {message}");
            }
        }
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(1, 1, 0)]
    #[case(BYTES_PER_GB, 1, 1)]
    #[case(BYTES_PER_GB + 1, 2, 1)]
    fn gigabyte_rounding(#[case] bytes: u64, #[case] ceil: u64, #[case] floor: u64) {
        assert_eq!(gb_ceil(bytes), ceil);
        assert_eq!(gb_floor(bytes), floor);
    }

    #[test]
    fn mount_options_report_access_kind() {
        assert!(MountOptions::block().is_block());
        assert_eq!(MountOptions::filesystem("xfs").fs_type(), Some("xfs"));
    }
}
