use proptest::prelude::*;
use std::io::Write;
use std::time::Duration;
use veriscan_client::api_client::ClientOptions;
use veriscan_client::config::{ClientConfig, ConfigError};
use veriscan_test_utils::fixtures::config_toml;

fn base_config() -> ClientConfig {
    ClientConfig::from_toml(&config_toml("http://localhost:8080", "tmp/veriscan-credentials.json"))
        .expect("fixture parses")
}

fn rejected_field(config: &ClientConfig) -> Option<&'static str> {
    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => Some(field),
        _ => None,
    }
}

#[test]
fn config_fixture_is_valid() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn config_requires_http_base_url() {
    let mut config = base_config();
    config.api_base_url = "ftp://example.com".to_string();
    assert_eq!(rejected_field(&config), Some("api_base_url"));

    config.api_base_url = "  ".to_string();
    assert_eq!(rejected_field(&config), Some("api_base_url"));
}

#[test]
fn config_requires_absolute_sign_in_path() {
    let mut config = base_config();
    config.sign_in_path = "signin".to_string();
    assert_eq!(rejected_field(&config), Some("sign_in_path"));
}

#[test]
fn config_requires_upload_types() {
    let mut config = base_config();
    config.upload.allowed_types.clear();
    assert_eq!(rejected_field(&config), Some("upload.allowed_types"));
}

#[test]
fn config_requires_nonzero_timeouts() {
    let mut config = base_config();
    config.stream.idle_timeout_ms = 0;
    assert_eq!(rejected_field(&config), Some("stream.idle_timeout_ms"));

    let mut config = base_config();
    config.request_timeout_ms = 0;
    assert_eq!(rejected_field(&config), Some("request_timeout_ms"));
}

#[test]
fn config_rejects_unknown_keys() {
    let contents = format!(
        "{}\nextra_key = true\n",
        config_toml("http://localhost:8080", "creds.json")
    );
    // The extra key lands in the last table.
    assert!(matches!(
        ClientConfig::from_toml(&contents),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn config_rejects_missing_sections() {
    let contents = r#"
api_base_url = "http://localhost:8080"
request_timeout_ms = 1000
credentials_path = "creds.json"
sign_in_path = "/signin"
"#;
    assert!(matches!(
        ClientConfig::from_toml(contents),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn config_load_requires_path() {
    assert!(matches!(
        ClientConfig::load(None),
        Err(ConfigError::MissingConfigPath)
    ));
}

#[test]
fn config_load_reads_and_validates_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(config_toml("https://api.example.com/", "creds.json").as_bytes())
        .expect("write config");

    let config = ClientConfig::load(Some(file.path())).expect("loads");
    assert_eq!(config.api_base_url, "https://api.example.com/");
    assert_eq!(config.request_timeout(), Duration::from_secs(600));
    assert_eq!(config.stream.idle_timeout(), Duration::from_secs(300));
}

#[test]
fn config_maps_to_client_options() {
    let config = base_config();
    let options = ClientOptions::from(&config);
    assert_eq!(options.max_retries, 3);
    assert_eq!(options.retry.base_delay, Duration::from_secs(1));
    assert_eq!(options.retry.max_delay, Duration::from_secs(5));
    assert_eq!(options.idle_timeout, Duration::from_secs(300));
    assert_eq!(options.upload_policy.max_size_bytes, 500 * 1024 * 1024);
    assert_eq!(
        options.analysis_rate_limit,
        Some((5, Duration::from_secs(60)))
    );
}

proptest! {
    #[test]
    fn retry_config_validation(base in 1u64..5_000, extra in 0u64..10_000) {
        let mut config = base_config();
        config.retry.base_delay_ms = base;
        config.retry.max_delay_ms = base + extra;
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_retry_delays_rejected(base in 2u64..5_000, shortfall in 1u64..2_000) {
        let mut config = base_config();
        config.retry.base_delay_ms = base;
        config.retry.max_delay_ms = base.saturating_sub(shortfall).max(1).min(base - 1);
        prop_assert_eq!(rejected_field(&config), Some("retry.max_delay_ms"));
    }
}
