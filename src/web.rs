//! Read-only HTTP endpoints over stored readings and aggregates.

use crate::config::AlertThresholds;
use crate::db::models::{DailyAggregate, Reading, TemperatureTrend, TriggeredAlert};
use crate::db::Repository;
use crate::error::AppError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

const TRIGGERED_ALERTS_LIMIT: i64 = 100;
const CHART_JS: &str = "https://cdn.jsdelivr.net/npm/chart.js";

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub thresholds: AlertThresholds,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/current-weather", get(current_weather))
        .route("/daily-aggregates", get(daily_aggregates))
        .route("/historical-trends", get(historical_trends))
        .route("/triggered-alerts", get(triggered_alerts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "Internal server error" })),
        )
            .into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn current_weather(
    State(state): State<AppState>,
) -> Result<Json<Vec<Reading>>, AppError> {
    Ok(Json(state.repository.latest_readings().await?))
}

async fn daily_aggregates(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let aggregates = state.repository.daily_aggregates().await?;
    Ok(Html(render_daily_aggregates(&aggregates)))
}

async fn historical_trends(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let trends = state.repository.temperature_trends().await?;
    Ok(Html(render_historical_trends(&trends)))
}

async fn triggered_alerts(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let alerts = state
        .repository
        .triggered_alerts(&state.thresholds, TRIGGERED_ALERTS_LIMIT)
        .await?;
    Ok(Html(render_triggered_alerts(&alerts)))
}

#[derive(Debug, Serialize, PartialEq)]
struct LineDataset {
    label: String,
    data: Vec<Option<f64>>,
}

/// Pivot (location, date, value) points into one series per location over
/// the sorted union of dates. Gaps become `null`.
fn line_series<'a, I>(points: I) -> (Vec<NaiveDate>, Vec<LineDataset>)
where
    I: IntoIterator<Item = (&'a str, NaiveDate, f64)> + Clone,
{
    let dates: Vec<NaiveDate> = points
        .clone()
        .into_iter()
        .map(|(_, date, _)| date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let locations: BTreeSet<&str> = points.clone().into_iter().map(|(l, _, _)| l).collect();

    let datasets = locations
        .into_iter()
        .map(|location| LineDataset {
            label: location.to_string(),
            data: dates
                .iter()
                .map(|date| {
                    points
                        .clone()
                        .into_iter()
                        .find(|(l, d, _)| *l == location && d == date)
                        .map(|(_, _, v)| v)
                })
                .collect(),
        })
        .collect();

    (dates, datasets)
}

fn render_daily_aggregates(aggregates: &[DailyAggregate]) -> String {
    let (dates, datasets) = line_series(
        aggregates
            .iter()
            .map(|a| (a.location.as_str(), a.date, a.avg_temp)),
    );

    let mut rows = String::new();
    for a in aggregates {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
            a.date,
            escape_html(&a.location),
            a.avg_temp,
            a.max_temp,
            a.min_temp,
            escape_html(&a.dominant_condition)
        );
    }

    let chart = format!(
        "{{type: 'line', data: {{labels: {}, datasets: {}}}, \
         options: {{responsive: true, plugins: {{title: {{display: true, text: 'Average Temperature by City'}}}}, \
         scales: {{y: {{beginAtZero: true, title: {{display: true, text: 'Temperature (°C)'}}}}}}}}}}",
        script_json(&dates),
        script_json(&datasets)
    );

    page(
        "Daily Weather Aggregates",
        &chart,
        "<th>Date</th><th>City</th><th>Avg Temp</th><th>Max Temp</th><th>Min Temp</th><th>Dominant Condition</th>",
        &rows,
    )
}

fn render_historical_trends(trends: &[TemperatureTrend]) -> String {
    let (dates, datasets) = line_series(
        trends
            .iter()
            .map(|t| (t.location.as_str(), t.date, t.avg_temp)),
    );

    let mut rows = String::new();
    for t in trends {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td></tr>",
            t.date,
            escape_html(&t.location),
            t.avg_temp
        );
    }

    let chart = format!(
        "{{type: 'line', data: {{labels: {}, datasets: {}}}, \
         options: {{responsive: true, plugins: {{title: {{display: true, text: 'Historical Average Temperature Trends by City'}}}}, \
         scales: {{y: {{beginAtZero: false, title: {{display: true, text: 'Temperature (°C)'}}}}}}}}}}",
        script_json(&dates),
        script_json(&datasets)
    );

    page(
        "Historical Weather Trends",
        &chart,
        "<th>Date</th><th>City</th><th>Avg Temp</th>",
        &rows,
    )
}

/// `x` is epoch milliseconds, since the scatter x axis is linear.
#[derive(Debug, Serialize)]
struct ScatterPoint {
    x: i64,
    y: f64,
}

#[derive(Debug, Serialize)]
struct ScatterDataset {
    label: String,
    data: Vec<ScatterPoint>,
    #[serde(rename = "backgroundColor")]
    background_color: &'static str,
}

fn render_triggered_alerts(alerts: &[TriggeredAlert]) -> String {
    let datasets: Vec<ScatterDataset> = alerts
        .iter()
        .map(|a| ScatterDataset {
            label: a.location.clone(),
            data: vec![ScatterPoint {
                x: a.observed_at.timestamp_millis(),
                y: a.temp,
            }],
            background_color: if a.alert_type == "High Temperature" {
                "red"
            } else {
                "blue"
            },
        })
        .collect();

    let mut rows = String::new();
    for a in alerts {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
            a.observed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            escape_html(&a.location),
            a.temp,
            escape_html(&a.alert_type)
        );
    }

    let chart = format!(
        "{{type: 'scatter', data: {{datasets: {}}}, \
         options: {{responsive: true, plugins: {{title: {{display: true, text: 'Triggered Weather Alerts'}}}}, \
         scales: {{x: {{type: 'linear', title: {{display: true, text: 'Time (UTC)'}}, \
         ticks: {{callback: (value) => new Date(value).toISOString().slice(0, 16).replace('T', ' ')}}}}, \
         y: {{title: {{display: true, text: 'Temperature (°C)'}}}}}}}}}}",
        script_json(&datasets)
    );

    page(
        "Triggered Weather Alerts",
        &chart,
        "<th>Date</th><th>City</th><th>Temperature</th><th>Alert Type</th>",
        &rows,
    )
}

fn page(title: &str, chart_config: &str, header: &str, rows: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{title}</title>
    <script src="{CHART_JS}"></script>
  </head>
  <body>
    <h1>{title}</h1>
    <canvas id="chart" width="800" height="400"></canvas>
    <script>
      new Chart(document.getElementById('chart').getContext('2d'), {chart_config});
    </script>
    <table border="1">
      <tr>{header}</tr>
      {rows}
    </table>
  </body>
</html>
"#
    )
}

/// JSON safe to embed inside a `<script>` element.
fn script_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
