use crate::config::AlertThresholds;
use crate::db::models::{
    DailyAggregate, NewReading, Reading, StoreOutcome, TemperatureTrend, TriggeredAlert,
};
use crate::error::Result;
use crate::pipeline::ReadingStore;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

/// Storage handle shared by the scheduler, pipeline and read endpoints.
///
/// Wraps the process-wide connection pool; every query checks a connection
/// out of the pool and returns it when the query future completes or fails.
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the reading and aggregate tables if they do not exist yet.
    ///
    /// Safe to call on every start; already-applied migrations are skipped.
    pub async fn init_schema(&self) -> Result<()> {
        info!("Ensuring database schema...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database schema ready");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn store_reading(&self, reading: &NewReading) -> Result<StoreOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO weather_readings
                (location, observed_at, temp, feels_like, temp_min, temp_max,
                 pressure, humidity, wind_speed, wind_deg, condition)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (location, observed_at) DO NOTHING
            "#,
        )
        .bind(&reading.location)
        .bind(reading.observed_at)
        .bind(reading.temp)
        .bind(reading.feels_like)
        .bind(reading.temp_min)
        .bind(reading.temp_max)
        .bind(reading.pressure)
        .bind(reading.humidity)
        .bind(reading.wind_speed)
        .bind(reading.wind_deg)
        .bind(&reading.condition)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                "Reading for {} at {} already stored",
                reading.location, reading.observed_at
            );
            Ok(StoreOutcome::Duplicate)
        } else {
            Ok(StoreOutcome::Inserted)
        }
    }

    /// Roll up the readings of one UTC day into `daily_aggregates`.
    ///
    /// Existing rows for the same (date, location) are overwritten, so
    /// re-running for a date is idempotent. The dominant condition is the
    /// most frequent label; ties go to the byte-wise smallest label.
    ///
    /// Returns the number of aggregate rows written.
    pub async fn compute_daily_aggregates(&self, date: NaiveDate) -> Result<u64> {
        let day_start = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
        let day_end = day_start + Duration::days(1);

        let result = sqlx::query(
            r#"
            WITH day_readings AS (
                SELECT location, temp, condition
                FROM weather_readings
                WHERE observed_at >= $2 AND observed_at < $3
            ),
            stats AS (
                SELECT location,
                       AVG(temp) AS avg_temp,
                       MAX(temp) AS max_temp,
                       MIN(temp) AS min_temp
                FROM day_readings
                GROUP BY location
            ),
            dominant AS (
                SELECT DISTINCT ON (location) location, condition
                FROM (
                    SELECT location, condition, COUNT(*) AS occurrences
                    FROM day_readings
                    GROUP BY location, condition
                ) counts
                ORDER BY location, occurrences DESC, condition COLLATE "C" ASC
            )
            INSERT INTO daily_aggregates
                (date, location, avg_temp, max_temp, min_temp, dominant_condition)
            SELECT $1, s.location, s.avg_temp, s.max_temp, s.min_temp, d.condition
            FROM stats s
            JOIN dominant d ON d.location = s.location
            ON CONFLICT (date, location) DO UPDATE SET
                avg_temp = EXCLUDED.avg_temp,
                max_temp = EXCLUDED.max_temp,
                min_temp = EXCLUDED.min_temp,
                dominant_condition = EXCLUDED.dominant_condition
            "#,
        )
        .bind(date)
        .bind(day_start)
        .bind(day_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Most recent reading for every location that has one.
    pub async fn latest_readings(&self) -> Result<Vec<Reading>> {
        let readings = sqlx::query_as::<_, Reading>(
            r#"
            SELECT DISTINCT ON (location)
                id, location, observed_at, temp, feels_like, temp_min, temp_max,
                pressure, humidity, wind_speed, wind_deg, condition
            FROM weather_readings
            ORDER BY location, observed_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(readings)
    }

    pub async fn daily_aggregates(&self) -> Result<Vec<DailyAggregate>> {
        let aggregates = sqlx::query_as::<_, DailyAggregate>(
            r#"
            SELECT date, location, avg_temp, max_temp, min_temp, dominant_condition
            FROM daily_aggregates
            ORDER BY date DESC, location
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(aggregates)
    }

    /// Average temperature per location per UTC day, computed from raw readings.
    pub async fn temperature_trends(&self) -> Result<Vec<TemperatureTrend>> {
        let trends = sqlx::query_as::<_, TemperatureTrend>(
            r#"
            SELECT location,
                   (observed_at AT TIME ZONE 'UTC')::date AS date,
                   AVG(temp) AS avg_temp
            FROM weather_readings
            GROUP BY location, (observed_at AT TIME ZONE 'UTC')::date
            ORDER BY location, date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(trends)
    }

    /// Readings outside the thresholds, newest first.
    pub async fn triggered_alerts(
        &self,
        thresholds: &AlertThresholds,
        limit: i64,
    ) -> Result<Vec<TriggeredAlert>> {
        let alerts = sqlx::query_as::<_, TriggeredAlert>(
            r#"
            SELECT location, observed_at, temp,
                CASE
                    WHEN temp > $1 THEN 'High Temperature'
                    ELSE 'Low Temperature'
                END AS alert_type
            FROM weather_readings
            WHERE temp > $1 OR temp < $2
            ORDER BY observed_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(thresholds.high_temperature)
        .bind(thresholds.low_temperature)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }

    pub async fn count_readings(&self, location: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM weather_readings WHERE location = $1",
        )
        .bind(location)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl ReadingStore for Repository {
    async fn store_reading(&self, reading: &NewReading) -> Result<StoreOutcome> {
        Repository::store_reading(self, reading).await
    }
}
