use crate::db::models::NewReading;
use crate::error::{AppError, Result};
use crate::fetcher::RawObservation;
use chrono::DateTime;

const KELVIN_OFFSET: f64 = 273.15;

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

pub struct Normalizer;

impl Normalizer {
    /// Convert a raw API observation into a reading for `location`.
    ///
    /// Temperatures are converted from Kelvin without rounding and the first
    /// reported condition becomes the condition label. Any missing field is
    /// an error rather than a default.
    pub fn normalize(location: &str, raw: &RawObservation) -> Result<NewReading> {
        let dt = required(raw.dt, "dt")?;
        let observed_at = DateTime::from_timestamp(dt, 0).ok_or_else(|| {
            AppError::MalformedData(format!("observation time {} is out of range", dt))
        })?;

        let main = raw
            .main
            .as_ref()
            .ok_or_else(|| missing_field("main"))?;
        let wind = raw
            .wind
            .as_ref()
            .ok_or_else(|| missing_field("wind"))?;

        let condition = raw
            .weather
            .first()
            .ok_or_else(|| missing_field("weather[0]"))?
            .main
            .clone()
            .ok_or_else(|| missing_field("weather[0].main"))?;

        Ok(NewReading {
            location: location.to_string(),
            observed_at,
            temp: kelvin_to_celsius(required(main.temp, "main.temp")?),
            feels_like: kelvin_to_celsius(required(main.feels_like, "main.feels_like")?),
            temp_min: kelvin_to_celsius(required(main.temp_min, "main.temp_min")?),
            temp_max: kelvin_to_celsius(required(main.temp_max, "main.temp_max")?),
            pressure: required(main.pressure, "main.pressure")?,
            humidity: required(main.humidity, "main.humidity")?,
            wind_speed: required(wind.speed, "wind.speed")?,
            wind_deg: required(wind.deg, "wind.deg")?,
            condition,
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| missing_field(field))
}

fn missing_field(field: &str) -> AppError {
    AppError::MalformedData(format!("missing field '{}'", field))
}
