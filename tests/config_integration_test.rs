use city_weather_ingest::config::Config;
use city_weather_ingest::error::AppError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Test loading a full config file with environment substitution
#[test]
fn test_load_config_file() {
    std::env::set_var("CWI_IT_DB_PASSWORD", "s3cret");
    std::env::set_var("CWI_IT_API_KEY", "abc123");

    let file = write_config(
        r#"
database:
  host: db.internal
  port: "6543"
  name: weather
  user: ingest
  password: ${CWI_IT_DB_PASSWORD}
scheduler:
  interval_minutes: 2
  aggregate_cron: "15 0 * * *"
source:
  api_key: ${CWI_IT_API_KEY}
  request_timeout_seconds: 3
locations:
  country_code: IN
  cities: [Delhi, Mumbai]
alerts:
  high_temperature: 40
  low_temperature: 5
notifications:
  endpoint: https://relay.example.com/send
  api_token: token
  from: alerts@example.com
  to: ops@example.com
server:
  bind_address: 127.0.0.1:8080
"#,
    );

    let config = Config::load(file.path()).expect("Config should load");

    let options = config.database.connect_options();
    assert_eq!(options.get_host(), "db.internal");
    assert_eq!(options.get_port(), 6543);
    assert_eq!(options.get_username(), "ingest");
    assert_eq!(options.get_database(), Some("weather"));
    assert_eq!(config.database.password, "s3cret");
    assert_eq!(config.scheduler.aggregate_cron, "15 0 * * *");
    assert_eq!(config.source.api_key, "abc123");
    assert_eq!(config.source.request_timeout_seconds, 3);
    assert_eq!(config.scheduler.interval_minutes, 2);
    assert_eq!(config.locations.locations().len(), 2);
    assert_eq!(config.alerts.high_temperature, 40.0);

    let notifications = config.notifications.expect("Notifications should be set");
    assert_eq!(notifications.to, "ops@example.com");
    assert_eq!(notifications.subject, "Weather Alert");

    assert_eq!(
        config.server.socket_addr().unwrap().to_string(),
        "127.0.0.1:8080"
    );
}

/// Test that a password with URL delimiters reaches the connection options intact
#[test]
fn test_password_with_url_delimiters() {
    std::env::set_var("CWI_IT_ODD_PASSWORD", "p@ss/w#rd");

    let file = write_config(
        r#"
database:
  host: db.internal
  name: weather
  user: ingest
  password: "${CWI_IT_ODD_PASSWORD}"
source:
  api_key: key
"#,
    );

    let config = Config::load(file.path()).expect("Config should load");
    assert_eq!(config.database.password, "p@ss/w#rd");

    let options = config.database.connect_options();
    assert_eq!(options.get_host(), "db.internal");
    assert_eq!(options.get_port(), 5432);
    assert_eq!(options.get_database(), Some("weather"));
}

/// Test that a missing file is a configuration error
#[test]
fn test_load_missing_file() {
    let result = Config::load("/nonexistent/config.yaml");
    assert!(matches!(result, Err(AppError::Config(_))));
}

/// Test that an invalid bind address is rejected
#[test]
fn test_invalid_bind_address() {
    let file = write_config(
        r#"
database: {host: localhost, name: weather, user: weather, password: pw}
source: {api_key: key}
server: {bind_address: "not-an-address"}
"#,
    );

    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("bind_address"));
}
