//! Configuration loading via `ortho-config`.
//!
//! Two structs are loaded independently: [`ScalewayConfig`] (prefix `SCW`)
//! carries provider credentials and [`DriverConfig`] (prefix `CSI`) carries
//! the plugin's own settings.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::metadata::DEFAULT_METADATA_URL;

const CONFIG_FILE: &str = "scaleway-csi.toml";
const BINARY_NAME: &str = "scaleway-csi";
const UNIX_SCHEME: &str = "unix://";

/// Scaleway credentials and placement defaults derived from environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Project that owns created volumes. This value is required.
    pub default_project_id: String,
    /// Zone used when a request carries no topology. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Comma-separated zones searched by name lookups and listings, in
    /// addition to the default zone.
    pub zones: Option<String>,
    /// Seconds between polls while waiting for an asynchronous action.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Seconds before a pending asynchronous action is reported as timed out.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(BINARY_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Zones the backend searches, default zone first, without duplicates.
    #[must_use]
    pub fn zones(&self) -> Vec<String> {
        let mut zones = vec![self.default_zone.trim().to_owned()];
        let extra = self.zones.as_deref().unwrap_or_default();
        for zone in extra.split(',').map(str::trim) {
            if !zone.is_empty() && !zones.iter().any(|known| known == zone) {
                zones.push(zone.to_owned());
            }
        }
        zones
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a wait setting is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        if self.poll_interval_secs == 0 || self.wait_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs/wait_timeout_secs",
                message: String::from("must be greater than zero"),
            });
        }
        Ok(())
    }
}

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Plugin settings: socket endpoint, node identity and logging.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CSI")]
pub struct DriverConfig {
    /// Socket the plugin listens on, as a `unix://` URL.
    pub endpoint: Option<String>,
    /// Server identifier override (`<zone>/<uuid>`); the metadata service is
    /// queried when absent.
    pub server_id: Option<String>,
    /// Metadata endpoint used to discover the local server.
    #[ortho_config(default = DEFAULT_METADATA_URL.to_owned())]
    pub metadata_url: String,
    /// `text` or `json`.
    #[ortho_config(default = "text".to_owned())]
    pub log_format: String,
}

impl DriverConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(BINARY_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Replaces the endpoint when `endpoint` is given, typically from a CLI
    /// flag that outranks the environment.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        if endpoint.is_some() {
            self.endpoint = endpoint;
        }
        self
    }

    /// Filesystem path of the socket named by the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no endpoint is configured
    /// and [`ConfigError::Invalid`] when it is not a `unix://` URL with a
    /// path.
    pub fn socket_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        let endpoint = self.endpoint.as_deref().unwrap_or_default().trim();
        if endpoint.is_empty() {
            return Err(FieldMetadata::new(
                "plugin endpoint",
                "CSI_ENDPOINT",
                "endpoint",
                "csi",
            )
            .missing());
        }
        let path = endpoint
            .strip_prefix(UNIX_SCHEME)
            .ok_or_else(|| ConfigError::Invalid {
                field: "endpoint",
                message: format!("{endpoint} must start with {UNIX_SCHEME}"),
            })?;
        if path.is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                message: format!("{endpoint} has no socket path"),
            });
        }
        Ok(Utf8PathBuf::from(path))
    }

    /// Parsed log format.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for anything but `text` or `json`.
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        match self.log_format.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid {
                field: "log_format",
                message: format!("unknown log format '{other}', expected text or json"),
            }),
        }
    }

    /// Server id override, if one is configured and non-blank.
    #[must_use]
    pub fn server_id_override(&self) -> Option<&str> {
        self.server_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value cannot be used.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
