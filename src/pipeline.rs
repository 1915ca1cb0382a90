//! Per-location ingestion pipeline.
//!
//! Each configured location runs through
//! `resolve -> fetch -> normalize -> store -> alert`. A failure at any
//! stage ends processing for that location only; the cycle moves on to the
//! next one.

use crate::alert::{self, DispatchSummary, Notifier};
use crate::config::{AlertThresholds, Location};
use crate::db::models::{NewReading, StoreOutcome};
use crate::error::{AppError, Result};
use crate::fetcher::{Coordinates, RawObservation};
use crate::normalizer::Normalizer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Geocoding and current-conditions lookups.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn resolve(&self, location: &Location) -> Result<Coordinates>;
    async fn current(&self, coordinates: Coordinates) -> Result<RawObservation>;
}

/// Append-only reading storage.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn store_reading(&self, reading: &NewReading) -> Result<StoreOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Fetch,
    Normalize,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum LocationOutcome {
    Completed {
        stored: StoreOutcome,
        alerts: DispatchSummary,
    },
    Failed {
        stage: Stage,
        error: AppError,
    },
}

#[derive(Debug)]
pub struct LocationReport {
    pub location: String,
    pub outcome: LocationOutcome,
}

/// Result of one pass over all configured locations.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub locations: Vec<LocationReport>,
}

impl CycleReport {
    pub fn completed(&self) -> usize {
        self.locations
            .iter()
            .filter(|r| matches!(r.outcome, LocationOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.locations.len() - self.completed()
    }

    pub fn get(&self, location: &str) -> Option<&LocationOutcome> {
        self.locations
            .iter()
            .find(|r| r.location == location)
            .map(|r| &r.outcome)
    }
}

pub struct Pipeline {
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn ReadingStore>,
    notifier: Arc<dyn Notifier>,
    locations: Vec<Location>,
    thresholds: AlertThresholds,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn ReadingStore>,
        notifier: Arc<dyn Notifier>,
        locations: Vec<Location>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            locations,
            thresholds,
        }
    }

    /// Process every location once, sequentially and in configured order.
    pub async fn run_cycle(&self) -> CycleReport {
        info!("Starting ingestion cycle for {} locations", self.locations.len());

        let mut report = CycleReport::default();

        for location in &self.locations {
            let outcome = match self.process_location(location).await {
                Ok((stored, alerts)) => LocationOutcome::Completed { stored, alerts },
                Err((stage, e)) => {
                    error!(
                        "Error processing weather data for {} at {} stage: {}",
                        location.name, stage, e
                    );
                    LocationOutcome::Failed { stage, error: e }
                }
            };
            report.locations.push(LocationReport {
                location: location.name.clone(),
                outcome,
            });
        }

        info!(
            "Ingestion cycle completed: {} succeeded, {} failed",
            report.completed(),
            report.failed()
        );
        report
    }

    async fn process_location(
        &self,
        location: &Location,
    ) -> std::result::Result<(StoreOutcome, DispatchSummary), (Stage, AppError)> {
        let coordinates = self.resolve(location).await.map_err(|e| (Stage::Resolve, e))?;
        let raw = self.fetch(coordinates).await.map_err(|e| (Stage::Fetch, e))?;
        let reading = Self::normalize(location, &raw).map_err(|e| (Stage::Normalize, e))?;
        let stored = self.store(&reading).await.map_err(|e| (Stage::Store, e))?;

        // Re-stored observations were already evaluated when first seen
        let alerts = match stored {
            StoreOutcome::Inserted => self.alert(&reading).await,
            StoreOutcome::Duplicate => DispatchSummary::default(),
        };

        Ok((stored, alerts))
    }

    async fn resolve(&self, location: &Location) -> Result<Coordinates> {
        self.source.resolve(location).await
    }

    async fn fetch(&self, coordinates: Coordinates) -> Result<RawObservation> {
        self.source.current(coordinates).await
    }

    fn normalize(location: &Location, raw: &RawObservation) -> Result<NewReading> {
        Normalizer::normalize(&location.name, raw)
    }

    async fn store(&self, reading: &NewReading) -> Result<StoreOutcome> {
        self.store.store_reading(reading).await
    }

    async fn alert(&self, reading: &NewReading) -> DispatchSummary {
        let alerts = alert::evaluate(reading, &self.thresholds);
        if alerts.is_empty() {
            return DispatchSummary::default();
        }
        alert::dispatch(self.notifier.as_ref(), &alerts).await
    }
}
