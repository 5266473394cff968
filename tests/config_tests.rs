//! Configuration loading and validation.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use scaleway_csi::config::{ConfigError, DriverConfig, LogFormat, ScalewayConfig};
use scaleway_csi::metadata::DEFAULT_METADATA_URL;
use scaleway_csi::test_support::EnvGuard;

#[fixture]
fn valid_config() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        zones: None,
        poll_interval_secs: 5,
        wait_timeout_secs: 300,
    }
}

#[fixture]
fn driver_config() -> DriverConfig {
    DriverConfig {
        endpoint: None,
        server_id: None,
        metadata_url: DEFAULT_METADATA_URL.to_owned(),
        log_format: String::from("text"),
    }
}

#[rstest]
fn valid_config_passes(valid_config: ScalewayConfig) {
    valid_config.validate().expect("valid");
}

#[rstest]
#[case::secret(|cfg: &mut ScalewayConfig| cfg.secret_key.clear(), "SCW_SECRET_KEY", "secret_key")]
#[case::project(
    |cfg: &mut ScalewayConfig| cfg.default_project_id.clear(),
    "SCW_DEFAULT_PROJECT_ID",
    "default_project_id"
)]
#[case::zone(
    |cfg: &mut ScalewayConfig| cfg.default_zone = String::from("  "),
    "SCW_DEFAULT_ZONE",
    "default_zone"
)]
fn missing_fields_produce_actionable_errors(
    valid_config: ScalewayConfig,
    #[case] mutate: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField, got {error:?}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(
        message.contains("scaleway-csi.toml"),
        "should mention the config file: {message}"
    );
}

#[rstest]
fn zero_wait_settings_are_rejected(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        poll_interval_secs: 0,
        ..valid_config
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
}

#[rstest]
fn zones_start_with_the_default_and_skip_duplicates(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        zones: Some(String::from("nl-ams-1, fr-par-1,,pl-waw-1 ,nl-ams-1")),
        ..valid_config
    };
    assert_eq!(cfg.zones(), vec!["fr-par-1", "nl-ams-1", "pl-waw-1"]);
}

#[rstest]
#[case::plain("unix:///csi/csi.sock", "/csi/csi.sock")]
#[case::padded("  unix:///var/run/plugin.sock ", "/var/run/plugin.sock")]
fn socket_path_strips_the_scheme(
    driver_config: DriverConfig,
    #[case] endpoint: &str,
    #[case] expected: &str,
) {
    let cfg = driver_config.with_endpoint(Some(endpoint.to_owned()));
    assert_eq!(cfg.socket_path().expect("path"), Utf8PathBuf::from(expected));
}

#[rstest]
#[case::tcp("tcp://127.0.0.1:10000")]
#[case::no_path("unix://")]
fn socket_path_rejects_unusable_endpoints(driver_config: DriverConfig, #[case] endpoint: &str) {
    let cfg = driver_config.with_endpoint(Some(endpoint.to_owned()));
    assert!(matches!(
        cfg.socket_path(),
        Err(ConfigError::Invalid { field: "endpoint", .. })
    ));
}

#[rstest]
fn missing_endpoint_names_the_variable(driver_config: DriverConfig) {
    let err = driver_config.socket_path().expect_err("no endpoint");
    assert!(err.to_string().contains("CSI_ENDPOINT"), "{err}");
}

#[rstest]
fn endpoint_flag_only_overrides_when_given(driver_config: DriverConfig) {
    let configured = driver_config.with_endpoint(Some(String::from("unix:///a.sock")));
    let kept = configured.clone().with_endpoint(None);
    assert_eq!(kept.endpoint.as_deref(), Some("unix:///a.sock"));
}

#[rstest]
#[case::text("text", LogFormat::Text)]
#[case::empty("", LogFormat::Text)]
#[case::json("JSON", LogFormat::Json)]
fn log_format_parses(driver_config: DriverConfig, #[case] raw: &str, #[case] expected: LogFormat) {
    let cfg = DriverConfig {
        log_format: raw.to_owned(),
        ..driver_config
    };
    assert_eq!(cfg.log_format().expect("format"), expected);
}

#[rstest]
fn unknown_log_format_is_rejected(driver_config: DriverConfig) {
    let cfg = DriverConfig {
        log_format: String::from("yaml"),
        ..driver_config
    };
    assert!(cfg.log_format().is_err());
}

#[rstest]
#[case::absent(None, None)]
#[case::blank(Some("  "), None)]
#[case::set(Some(" fr-par-1/abc "), Some("fr-par-1/abc"))]
fn server_id_override_ignores_blanks(
    driver_config: DriverConfig,
    #[case] raw: Option<&str>,
    #[case] expected: Option<&str>,
) {
    let cfg = DriverConfig {
        server_id: raw.map(str::to_owned),
        ..driver_config
    };
    assert_eq!(cfg.server_id_override(), expected);
}

#[tokio::test]
async fn scaleway_config_loads_from_environment() {
    let _env = EnvGuard::apply(
        &[
            ("SCW_SECRET_KEY", "secret"),
            ("SCW_DEFAULT_PROJECT_ID", "project"),
            ("SCW_DEFAULT_ZONE", "nl-ams-1"),
            ("SCW_ZONES", "fr-par-1"),
        ],
        &["SCW_POLL_INTERVAL_SECS", "SCW_WAIT_TIMEOUT_SECS"],
    )
    .await;

    let cfg = ScalewayConfig::load_without_cli_args().expect("load");

    assert_eq!(cfg.secret_key, "secret");
    assert_eq!(cfg.default_project_id, "project");
    assert_eq!(cfg.zones(), vec!["nl-ams-1", "fr-par-1"]);
    assert_eq!(cfg.poll_interval_secs, 5);
    assert_eq!(cfg.wait_timeout_secs, 300);
    cfg.validate().expect("valid");
}

#[tokio::test]
async fn driver_config_loads_from_environment() {
    let _env = EnvGuard::apply(
        &[
            ("CSI_ENDPOINT", "unix:///csi/csi.sock"),
            ("CSI_LOG_FORMAT", "json"),
        ],
        &["CSI_SERVER_ID", "CSI_METADATA_URL"],
    )
    .await;

    let cfg = DriverConfig::load_without_cli_args().expect("load");

    assert_eq!(cfg.socket_path().expect("path"), Utf8PathBuf::from("/csi/csi.sock"));
    assert_eq!(cfg.log_format().expect("format"), LogFormat::Json);
    assert_eq!(cfg.metadata_url, DEFAULT_METADATA_URL);
    assert_eq!(cfg.server_id_override(), None);
}
