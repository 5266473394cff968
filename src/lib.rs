//! Container Storage Interface plugin for Scaleway Block SSD volumes.
//!
//! The crate exposes a backend abstraction over the provider's volume API,
//! an idempotency layer that makes every lifecycle call retry-safe, the
//! controller, node and identity services built on top of it, and a
//! newline-delimited JSON transport that serves them on a Unix socket.

pub mod backend;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod driver;
pub mod idempotent;
pub mod lifecycle;
pub mod metadata;
pub mod mount;
pub mod rpc;
pub mod scaleway;
pub mod stats;
pub mod test_support;
pub mod volume;

pub use backend::{BackendFuture, VolumeBackend, VolumeError};
pub use bootstrap::{BootstrapError, NodeHost};
pub use config::{ConfigError, DriverConfig, LogFormat, ScalewayConfig};
pub use idempotent::IdempotentVolumeService;
pub use lifecycle::{LifecycleState, ReadinessGate, ReadinessObserver};
pub use scaleway::ScalewayBackend;
pub use volume::{CreateOptions, MountOptions, Server, ServerId, Volume, VolumeId, VolumeStats};
