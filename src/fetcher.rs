use crate::config::{Location, SourceConfig};
use crate::error::{AppError, Result};
use crate::pipeline::WeatherSource;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Client for the geocoding and current-weather APIs.
pub struct Fetcher {
    client: Client,
    api_key: String,
    weather_base_url: String,
    geocoding_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Current conditions as returned by the weather API.
///
/// Every field is optional so that a missing value reaches the normalizer
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObservation {
    pub dt: Option<i64>,
    pub main: Option<RawMain>,
    pub wind: Option<RawWind>,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMain {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: Option<i32>,
    pub humidity: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWind {
    pub speed: Option<f64>,
    pub deg: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCondition {
    pub main: Option<String>,
}

impl Fetcher {
    pub fn new(source: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("city-weather-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(source.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key: source.api_key.clone(),
            weather_base_url: source.weather_base_url.trim_end_matches('/').to_string(),
            geocoding_base_url: source.geocoding_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Look up coordinates for a location, taking the first match.
    pub async fn resolve_coordinates(&self, location: &Location) -> Result<Coordinates> {
        let url = format!("{}/direct", self.geocoding_base_url);
        let query = format!("{},{}", location.name, location.country_code);
        debug!("Resolving coordinates for {} via {}", query, url);

        let resolution_error = |reason: String| AppError::Resolution {
            location: location.name.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .query(&[("q", query.as_str()), ("limit", "1"), ("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| resolution_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(resolution_error(format!("geocoding API returned {}", status)));
        }

        let matches: Vec<Coordinates> = response
            .json()
            .await
            .map_err(|e| resolution_error(format!("unexpected response: {}", e)))?;

        matches
            .into_iter()
            .next()
            .ok_or_else(|| resolution_error("no match found".to_string()))
    }

    /// Fetch current conditions at the given coordinates.
    pub async fn fetch_current(&self, coordinates: Coordinates) -> Result<RawObservation> {
        let url = format!("{}/weather", self.weather_base_url);
        debug!(
            "Fetching current weather for ({}, {}) from {}",
            coordinates.lat, coordinates.lon, url
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", coordinates.lat.to_string()),
                ("lon", coordinates.lon.to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!(
                "weather API returned {} for ({}, {})",
                status, coordinates.lat, coordinates.lon
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Fetch(format!("failed to read response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| AppError::MalformedData(format!("weather response: {}", e)))
    }
}

#[async_trait]
impl WeatherSource for Fetcher {
    async fn resolve(&self, location: &Location) -> Result<Coordinates> {
        self.resolve_coordinates(location).await
    }

    async fn current(&self, coordinates: Coordinates) -> Result<RawObservation> {
        self.fetch_current(coordinates).await
    }
}
