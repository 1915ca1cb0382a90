use crate::config::{AlertThresholds, NotificationConfig};
use crate::db::models::NewReading;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    HighTemperature,
    LowTemperature,
}

impl AlertKind {
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::HighTemperature => "High temperature",
            AlertKind::LowTemperature => "Low temperature",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub kind: AlertKind,
    pub location: String,
    pub temperature: f64,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alert for {}: {:.2}°C",
            self.kind.label(),
            self.location,
            self.temperature
        )
    }
}

/// Compare a reading against the thresholds.
///
/// Both bounds are strict: a temperature equal to a threshold does not alert.
pub fn evaluate(reading: &NewReading, thresholds: &AlertThresholds) -> Vec<AlertMessage> {
    let mut alerts = Vec::new();

    let mut push = |kind| {
        alerts.push(AlertMessage {
            kind,
            location: reading.location.clone(),
            temperature: reading.temp,
            observed_at: reading.observed_at,
        })
    };

    if reading.temp > thresholds.high_temperature {
        push(AlertKind::HighTemperature);
    }
    if reading.temp < thresholds.low_temperature {
        push(AlertKind::LowTemperature);
    }

    alerts
}

/// Delivery channel for alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &AlertMessage) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Send every alert, logging failures instead of returning them.
pub async fn dispatch(notifier: &dyn Notifier, alerts: &[AlertMessage]) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for alert in alerts {
        warn!("ALERT: {}", alert);
        match notifier.send(alert).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                error!("Failed to deliver alert for {}: {}", alert.location, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Notifier used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &AlertMessage) -> Result<()> {
        info!("No notification channel configured, alert logged only: {}", alert);
        Ok(())
    }
}

/// Sends alert emails through an HTTP mail relay.
pub struct EmailNotifier {
    client: Client,
    endpoint: String,
    api_token: String,
    from: String,
    to: String,
    subject: String,
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

impl EmailNotifier {
    pub fn new(config: &NotificationConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
            subject: config.subject.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &AlertMessage) -> Result<()> {
        let request = MailRequest {
            from: &self.from,
            to: &self.to,
            subject: &self.subject,
            text: alert.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Dispatch(format!("mail relay request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Dispatch(format!(
                "mail relay returned {}: {}",
                status, body
            )));
        }

        info!("Email alert sent to {}", self.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn reading(temp: f64) -> NewReading {
        NewReading {
            location: "Chennai".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temp,
            feels_like: temp,
            temp_min: temp,
            temp_max: temp,
            pressure: 1005,
            humidity: 70,
            wind_speed: 4.1,
            wind_deg: 180,
            condition: "Clouds".to_string(),
        }
    }

    fn thresholds() -> AlertThresholds {
        AlertThresholds {
            high_temperature: 35.0,
            low_temperature: 10.0,
        }
    }

    #[test]
    fn test_high_temperature_alert() {
        let alerts = evaluate(&reading(36.0), &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighTemperature);
    }

    #[test]
    fn test_low_temperature_alert() {
        let alerts = evaluate(&reading(5.0), &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowTemperature);
    }

    #[test]
    fn test_normal_temperature_no_alert() {
        assert!(evaluate(&reading(20.0), &thresholds()).is_empty());
    }

    #[test]
    fn test_threshold_boundaries_do_not_alert() {
        assert!(evaluate(&reading(35.0), &thresholds()).is_empty());
        assert!(evaluate(&reading(10.0), &thresholds()).is_empty());
    }

    #[test]
    fn test_implausible_thresholds_fire_both() {
        let inverted = AlertThresholds {
            high_temperature: 10.0,
            low_temperature: 35.0,
        };
        let alerts = evaluate(&reading(20.0), &inverted);
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn test_message_format_two_decimals() {
        let alerts = evaluate(&reading(309.0 - 273.15), &thresholds());
        assert_eq!(
            alerts[0].to_string(),
            "High temperature alert for Chennai: 35.85°C"
        );

        let alerts = evaluate(&reading(4.0), &thresholds());
        assert_eq!(
            alerts[0].to_string(),
            "Low temperature alert for Chennai: 4.00°C"
        );
    }

    struct FlakyNotifier {
        fail_for: f64,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, alert: &AlertMessage) -> Result<()> {
            if alert.temperature == self.fail_for {
                return Err(AppError::Dispatch("relay down".to_string()));
            }
            self.delivered.lock().unwrap().push(alert.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_failure() {
        let notifier = FlakyNotifier {
            fail_for: 40.0,
            delivered: Mutex::new(Vec::new()),
        };
        let mut alerts = evaluate(&reading(40.0), &thresholds());
        alerts.extend(evaluate(&reading(2.0), &thresholds()));

        let summary = dispatch(&notifier, &alerts).await;

        assert_eq!(summary, DispatchSummary { sent: 1, failed: 1 });
        assert_eq!(notifier.delivered.lock().unwrap().len(), 1);
    }
}
