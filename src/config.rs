use crate::error::{AppError, Result};
use serde::{Deserialize, Deserializer};
use sqlx::postgres::PgConnectOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default)]
    pub alerts: AlertThresholds,
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

/// Custom deserializer that handles port as both number and string
///
/// Accepts:
/// - `port: 5432` (number)
/// - `port: "5432"` (string that parses to number)
/// - `port: ${DB_PORT}` (env var substituted to either)
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid port number: '{}'", s))),
    }
}

impl DatabaseConfig {
    /// Connection options built field by field, so credentials never pass
    /// through URL parsing.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: u64,
    /// Cron expression (UTC) for the job that aggregates the previous day
    #[serde(default = "default_aggregate_cron")]
    pub aggregate_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            initial_delay_seconds: default_initial_delay(),
            aggregate_cron: default_aggregate_cron(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    1
}

fn default_initial_delay() -> u64 {
    5
}

fn default_aggregate_cron() -> String {
    "0 0 * * *".to_string()
}

impl SchedulerConfig {
    /// Parse `aggregate_cron`.
    ///
    /// The `cron` crate expects 6 fields (sec min hr dom month dow). A
    /// standard 5-field expression gets "0 " prepended to pin seconds to zero.
    pub fn aggregate_schedule(&self) -> Result<cron::Schedule> {
        let trimmed = self.aggregate_cron.trim();
        let expr = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        cron::Schedule::from_str(&expr).map_err(|e| {
            AppError::Config(format!(
                "Invalid scheduler aggregate_cron '{}': {}",
                self.aggregate_cron, e
            ))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub api_key: String,
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,
    #[serde(default = "default_geocoding_base_url")]
    pub geocoding_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_geocoding_base_url() -> String {
    "https://api.openweathermap.org/geo/1.0".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

/// A configured city, resolved to coordinates on every ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub country_code: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationsConfig {
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_cities")]
    pub cities: Vec<String>,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
            cities: default_cities(),
        }
    }
}

fn default_country_code() -> String {
    "IN".to_string()
}

fn default_cities() -> Vec<String> {
    ["Delhi", "Mumbai", "Chennai", "Bangalore", "Kolkata", "Hyderabad"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

impl LocationsConfig {
    /// Configured cities in order, each scoped to the configured country.
    pub fn locations(&self) -> Vec<Location> {
        self.cities
            .iter()
            .map(|city| Location {
                name: city.trim().to_string(),
                country_code: self.country_code.clone(),
            })
            .collect()
    }
}

/// Temperature thresholds in Celsius.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    #[serde(default = "default_high_temperature")]
    pub high_temperature: f64,
    #[serde(default = "default_low_temperature")]
    pub low_temperature: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_temperature: default_high_temperature(),
            low_temperature: default_low_temperature(),
        }
    }
}

fn default_high_temperature() -> f64 {
    35.0
}

fn default_low_temperature() -> f64 {
    10.0
}

/// Mail relay used to deliver alert emails.
#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    pub endpoint: String,
    pub api_token: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "Weather Alert".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            AppError::Config(format!(
                "Invalid server bind_address '{}': {}",
                self.bind_address, e
            ))
        })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse(&content)
    }

    /// Expand environment variables, deserialize and validate
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut fields_to_check = vec![
            ("DB_HOST", &self.database.host),
            ("DB_NAME", &self.database.name),
            ("DB_USER", &self.database.user),
            ("DB_PASSWORD", &self.database.password),
            ("OPENWEATHERMAP_API_KEY", &self.source.api_key),
        ];
        if let Some(notifications) = &self.notifications {
            fields_to_check.push(("MAIL_RELAY_URL", &notifications.endpoint));
            fields_to_check.push(("MAIL_RELAY_TOKEN", &notifications.api_token));
            fields_to_check.push(("EMAIL_USER", &notifications.from));
            fields_to_check.push(("NOTIFICATION_EMAIL", &notifications.to));
        }

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} environment variable is not set. \
                     Please set it or create a .env file. \
                     See .env.example for required variables.",
                    field_name
                )));
            }
        }

        if self.database.host.is_empty() {
            return Err(AppError::Config(
                "Database host cannot be empty".to_string(),
            ));
        }

        if self.database.name.is_empty() {
            return Err(AppError::Config(
                "Database name cannot be empty".to_string(),
            ));
        }

        if self.database.user.is_empty() {
            return Err(AppError::Config(
                "Database user cannot be empty".to_string(),
            ));
        }

        if self.database.port == 0 {
            return Err(AppError::Config("Database port cannot be 0".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Config(
                "Database max_connections must be at least 1".to_string(),
            ));
        }

        if self.database.max_connections > 100 {
            return Err(AppError::Config(format!(
                "Database max_connections {} seems too high, maximum recommended is 100",
                self.database.max_connections
            )));
        }

        if self.scheduler.interval_minutes == 0 {
            return Err(AppError::Config(
                "Scheduler interval_minutes must be greater than 0".to_string(),
            ));
        }

        self.scheduler.aggregate_schedule()?;

        if self.source.api_key.trim().is_empty() {
            return Err(AppError::Config(
                "Source api_key cannot be empty".to_string(),
            ));
        }

        if self.source.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "Source request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        for (name, base_url) in [
            ("weather_base_url", &self.source.weather_base_url),
            ("geocoding_base_url", &self.source.geocoding_base_url),
        ] {
            let parsed = url::Url::parse(base_url).map_err(|e| {
                AppError::Config(format!("Invalid source {} '{}': {}", name, base_url, e))
            })?;
            if parsed.scheme() != "https" {
                return Err(AppError::Config(format!(
                    "Source {} must use HTTPS, got: {}",
                    name,
                    parsed.scheme()
                )));
            }
        }

        if self.locations.cities.is_empty() {
            return Err(AppError::Config(
                "At least one city must be configured".to_string(),
            ));
        }

        if self.locations.cities.iter().any(|c| c.trim().is_empty()) {
            return Err(AppError::Config(
                "City names cannot be empty".to_string(),
            ));
        }

        let country = &self.locations.country_code;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::Config(format!(
                "Country code '{}' must be exactly 2 letters (e.g., 'IN', 'US')",
                country
            )));
        }

        if self.alerts.low_temperature >= self.alerts.high_temperature {
            return Err(AppError::Config(format!(
                "Alert low_temperature ({}) must be below high_temperature ({})",
                self.alerts.low_temperature, self.alerts.high_temperature
            )));
        }

        if let Some(notifications) = &self.notifications {
            url::Url::parse(&notifications.endpoint).map_err(|e| {
                AppError::Config(format!(
                    "Invalid notifications endpoint '{}': {}",
                    notifications.endpoint, e
                ))
            })?;
            if notifications.to.trim().is_empty() {
                return Err(AppError::Config(
                    "Notification recipient cannot be empty".to_string(),
                ));
            }
        }

        self.server.socket_addr()?;

        Ok(())
    }
}

/// Substitute `${VAR}` placeholders from the environment.
///
/// Comment lines are left untouched, so a commented-out section never
/// requires its variables to be set.
fn expand_env_vars(content: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid placeholder pattern: {}", e)))?;

    let mut missing_vars: Vec<String> = Vec::new();
    let mut lines = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let expanded = re.replace_all(line, |caps: &regex_lite::Captures| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        lines.push(expanded.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
database:
  host: localhost
  port: 5432
  name: weather
  user: weather
  password: secret
source:
  api_key: test-key
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.scheduler.interval_minutes, 1);
        assert_eq!(config.scheduler.aggregate_cron, "0 0 * * *");
        assert_eq!(config.locations.country_code, "IN");
        assert_eq!(config.locations.cities.len(), 6);
        assert_eq!(config.alerts.high_temperature, 35.0);
        assert_eq!(config.alerts.low_temperature, 10.0);
        assert!(config.notifications.is_none());
        assert_eq!(
            config.source.weather_base_url,
            "https://api.openweathermap.org/data/2.5"
        );
    }

    #[test]
    fn test_locations_keep_configured_order() {
        let locations = LocationsConfig {
            country_code: "IN".to_string(),
            cities: vec!["Pune".to_string(), " Goa ".to_string()],
        }
        .locations();

        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].name, "Pune");
        assert_eq!(locations[1].name, "Goa");
        assert_eq!(locations[1].country_code, "IN");
    }

    #[test]
    fn test_aggregate_cron_accepts_five_and_six_fields() {
        for expr in ["30 1 * * *", "0 30 1 * * *"] {
            let scheduler = SchedulerConfig {
                aggregate_cron: expr.to_string(),
                ..SchedulerConfig::default()
            };
            assert!(scheduler.aggregate_schedule().is_ok(), "{} should parse", expr);
        }
    }

    #[test]
    fn test_aggregate_cron_rejected_at_load() {
        let yaml = format!("{}scheduler:\n  aggregate_cron: \"at midnight\"\n", MINIMAL);
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("aggregate_cron"));
    }

    #[test]
    fn test_connect_options_keep_special_characters() {
        let config = Config::parse(&MINIMAL.replace("password: secret", "password: \"p@ss/w#rd:1\""))
            .unwrap();
        assert_eq!(config.database.password, "p@ss/w#rd:1");

        let options = config.database.connect_options();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "weather");
        assert_eq!(options.get_database(), Some("weather"));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let yaml = format!("{}alerts:\n  high_temperature: 5\n  low_temperature: 10\n", MINIMAL);
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("low_temperature"));
    }

    #[test]
    fn test_plain_http_source_rejected() {
        let yaml = MINIMAL.replace(
            "api_key: test-key",
            "api_key: test-key\n  geocoding_base_url: http://api.openweathermap.org/geo/1.0",
        );
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("must use HTTPS"));
    }

    #[test]
    fn test_empty_city_list_rejected() {
        let yaml = format!("{}locations:\n  cities: []\n", MINIMAL);
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_missing_env_var_reported() {
        let yaml = MINIMAL.replace("secret", "${CWI_TEST_UNSET_PASSWORD}");
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("CWI_TEST_UNSET_PASSWORD"));
    }

    #[test]
    fn test_commented_placeholders_ignored() {
        let yaml = format!("{}# notifications:\n#   to: ${{CWI_TEST_NEVER_SET}}\n", MINIMAL);
        assert!(Config::parse(&yaml).is_ok());
    }

    #[test]
    fn test_port_deserialize_from_number() {
        let yaml = r#"
host: localhost
port: 5432
name: test
user: test
password: test
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_port_deserialize_from_string() {
        let yaml = r#"
host: localhost
port: "5432"
name: test
user: test
password: test
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_port_deserialize_invalid_string() {
        let yaml = r#"
host: localhost
port: "not_a_number"
name: test
user: test
password: test
"#;
        let result: std::result::Result<DatabaseConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Invalid port number") || err_msg.contains("not_a_number"));
    }
}
