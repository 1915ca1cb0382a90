use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A stored weather reading. Temperatures are Celsius.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Reading {
    pub id: i64,
    pub location: String,
    pub observed_at: DateTime<Utc>,
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i32,
    pub humidity: i32,
    pub wind_speed: f64,
    pub wind_deg: i32,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub location: String,
    pub observed_at: DateTime<Utc>,
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i32,
    pub humidity: i32,
    pub wind_speed: f64,
    pub wind_deg: i32,
    pub condition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// A reading for the same location and observation time already exists
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub location: String,
    pub avg_temp: f64,
    pub max_temp: f64,
    pub min_temp: f64,
    pub dominant_condition: String,
}

/// Average temperature for one location on one UTC day.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TemperatureTrend {
    pub location: String,
    pub date: NaiveDate,
    pub avg_temp: f64,
}

/// A stored reading outside the configured thresholds.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TriggeredAlert {
    pub location: String,
    pub observed_at: DateTime<Utc>,
    pub temp: f64,
    pub alert_type: String,
}
