mod file;
mod templates;

pub use file::JsonFileNotifier;
pub use templates::AlertTemplate;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use decline_detector::{DeclineReport, DrillDownTarget};
use kpi_core::DeclineEvent;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALERT_FILE: &str = "alerts/alerts.json";

/// What an alert is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertType {
    KpiDecline(DeclineEvent),
    RunSummary {
        metrics_analyzed: usize,
        events: usize,
        drill_down: Vec<DrillDownTarget>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Coarser than `Severity`: anything milder than -5% is informational.
    pub fn from_change(change_pct: f64) -> Self {
        if change_pct < -10.0 {
            AlertLevel::Critical
        } else if change_pct < -5.0 {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

/// A notification alert to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            level,
            timestamp: Utc::now(),
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn decline(event: &DeclineEvent) -> Self {
        let alert_type = AlertType::KpiDecline(event.clone());
        let title = AlertTemplate::title(&alert_type);
        let message = AlertTemplate::body(&alert_type);
        Self::new(
            alert_type,
            AlertLevel::from_change(event.change_pct),
            title,
            message,
        )
    }

    pub fn run_summary(report: &DeclineReport) -> Self {
        let level = if report.drill_down.is_empty() {
            AlertLevel::Info
        } else {
            AlertLevel::Warning
        };
        let alert_type = AlertType::RunSummary {
            metrics_analyzed: report.metrics_analyzed.len(),
            events: report.rows.len(),
            drill_down: report.drill_down.clone(),
        };
        let title = AlertTemplate::title(&alert_type);
        let message = AlertTemplate::body(&alert_type);
        Self::new(alert_type, level, title, message)
    }
}

/// Trait for alert channels.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
    fn name(&self) -> &str;
}

/// Errors from the alert system.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Webhook error: {0}")]
    Webhook(String),
    #[error("Alert file error: {0}")]
    File(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the alert service.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub console: bool,
    pub file_path: Option<PathBuf>,
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            console: true,
            file_path: Some(PathBuf::from(DEFAULT_ALERT_FILE)),
            webhook_url: None,
        }
    }
}

impl AlertConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let console = match lookup("ALERT_CONSOLE").unwrap_or_default().trim() {
            "0" | "false" | "off" => false,
            _ => true,
        };

        let file_path = match lookup("ALERT_FILE") {
            Some(v) if matches!(v.trim(), "" | "none" | "off") => None,
            Some(v) => Some(PathBuf::from(v.trim())),
            None => Some(PathBuf::from(DEFAULT_ALERT_FILE)),
        };

        Self {
            console,
            file_path,
            webhook_url: lookup("ALERT_WEBHOOK_URL").filter(|s| !s.trim().is_empty()),
        }
    }

    /// No channels at all; alerts are only kept in history.
    pub fn disabled() -> Self {
        Self {
            console: false,
            file_path: None,
            webhook_url: None,
        }
    }
}

/// Dispatches alerts to every configured channel and remembers what it sent.
pub struct AlertService {
    channels: Arc<Vec<Box<dyn AlertChannel>>>,
    history: Mutex<Vec<Alert>>,
}

impl AlertService {
    pub fn new(config: &AlertConfig) -> Self {
        let mut channels: Vec<Box<dyn AlertChannel>> = Vec::new();

        if config.console {
            channels.push(Box::new(ConsoleNotifier));
        }

        if let Some(ref path) = config.file_path {
            channels.push(Box::new(JsonFileNotifier::new(path.clone())));
            tracing::info!("Alerts will be appended to {}", path.display());
        }

        if let Some(ref webhook_url) = config.webhook_url {
            match WebhookNotifier::new(webhook_url) {
                Ok(notifier) => {
                    channels.push(Box::new(notifier));
                    tracing::info!("Webhook alerts enabled");
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize webhook notifier: {}", e);
                }
            }
        }

        if channels.is_empty() {
            tracing::info!("No alert channels configured");
        }

        Self::with_channels(channels)
    }

    pub fn with_channels(channels: Vec<Box<dyn AlertChannel>>) -> Self {
        Self {
            channels: Arc::new(channels),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Send an alert to all configured channels (fire-and-forget via tokio::spawn).
    pub fn send_alert(&self, alert: Alert) {
        self.record(&alert);
        let channels = self.channels.clone();
        tokio::spawn(async move {
            dispatch(&channels, &alert).await;
        });
    }

    /// Send alert to all channels, awaiting completion.
    pub async fn send_alert_async(&self, alert: &Alert) {
        self.record(alert);
        dispatch(&self.channels, alert).await;
    }

    pub async fn send_decline_alerts(&self, events: &[DeclineEvent]) -> usize {
        if !events.is_empty() {
            tracing::info!("Sending {} decline alerts", events.len());
        }
        for event in events {
            self.send_alert_async(&Alert::decline(event)).await;
        }
        events.len()
    }

    pub fn history(&self) -> Vec<Alert> {
        self.lock_history().clone()
    }

    /// Alerts sent within the last `hours` hours.
    pub fn recent(&self, hours: i64) -> Vec<Alert> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.lock_history()
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn record(&self, alert: &Alert) {
        self.lock_history().push(alert.clone());
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<Alert>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn dispatch(channels: &[Box<dyn AlertChannel>], alert: &Alert) {
    for channel in channels.iter() {
        match channel.send(alert).await {
            Ok(()) => tracing::debug!("Sent alert via {}", channel.name()),
            Err(e) => tracing::warn!("Failed to send alert via {}: {}", channel.name(), e),
        }
    }
}

/// Writes alerts to the log.
struct ConsoleNotifier;

#[async_trait]
impl AlertChannel for ConsoleNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.level {
            AlertLevel::Critical | AlertLevel::Warning => tracing::warn!(
                "ALERT [{}] {}: {}",
                alert.level.as_str().to_uppercase(),
                alert.title,
                alert.message
            ),
            AlertLevel::Info => tracing::info!("ALERT [INFO] {}: {}", alert.title, alert.message),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Chat webhook notifier (Slack-compatible `{"text": ...}` payload).
struct WebhookNotifier {
    webhook_url: reqwest::Url,
    client: reqwest::Client,
}

impl WebhookNotifier {
    fn new(webhook_url: &str) -> Result<Self, AlertError> {
        let url = reqwest::Url::parse(webhook_url.trim())
            .map_err(|e| AlertError::Config(format!("Invalid ALERT_WEBHOOK_URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AlertError::Config(format!(
                "ALERT_WEBHOOK_URL must be http(s), got {}",
                url.scheme()
            )));
        }
        Ok(Self {
            webhook_url: url,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = serde_json::json!({
            "text": AlertTemplate::render(alert),
        });

        self.client
            .post(self.webhook_url.clone())
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AlertError::Webhook(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kpi_core::{Direction, Severity};
    use std::collections::HashMap;

    pub(crate) fn event(entity: &str, change_pct: f64) -> DeclineEvent {
        DeclineEvent {
            entity_id: entity.to_string(),
            metric_id: "CSSR".to_string(),
            observation_date: NaiveDate::from_ymd_opt(2025, 10, 31).unwrap(),
            latest_value: 90.0,
            baseline_value: 100.0,
            change_pct,
            severity: Severity::from_magnitude(change_pct),
            limit_breached: None,
            direction: Direction::HigherBetter,
            lookback_days: 7,
            limit: None,
        }
    }

    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AlertChannel for Recording {
        async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
            self.seen.lock().unwrap().push(alert.title.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Broken;

    #[async_trait]
    impl AlertChannel for Broken {
        async fn send(&self, _alert: &Alert) -> Result<(), AlertError> {
            Err(AlertError::Webhook("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_alert_level_cutoffs() {
        assert_eq!(AlertLevel::from_change(-45.0), AlertLevel::Critical);
        assert_eq!(AlertLevel::from_change(-10.0), AlertLevel::Warning);
        assert_eq!(AlertLevel::from_change(-5.5), AlertLevel::Warning);
        assert_eq!(AlertLevel::from_change(-5.0), AlertLevel::Info);
        assert_eq!(AlertLevel::from_change(-2.0), AlertLevel::Info);
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ALERT_CONSOLE", "false"),
            ("ALERT_FILE", "none"),
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/T000"),
        ]);
        let config = AlertConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.console);
        assert!(config.file_path.is_none());
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example.com/T000"));

        let defaults = AlertConfig::from_lookup(|_| None);
        assert!(defaults.console);
        assert_eq!(defaults.file_path, Some(PathBuf::from(DEFAULT_ALERT_FILE)));
        assert!(defaults.webhook_url.is_none());
    }

    #[test]
    fn test_service_channels_follow_config() {
        let service = AlertService::new(&AlertConfig::disabled());
        assert!(service.channel_names().is_empty());

        let config = AlertConfig {
            console: true,
            file_path: None,
            webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
        };
        assert_eq!(AlertService::new(&config).channel_names(), vec!["console", "webhook"]);
    }

    #[test]
    fn test_invalid_webhook_url_is_config_error() {
        assert!(matches!(
            WebhookNotifier::new("not a url"),
            Err(AlertError::Config(_))
        ));
        assert!(matches!(
            WebhookNotifier::new("ftp://hooks.example.com/T000"),
            Err(AlertError::Config(_))
        ));
        assert!(WebhookNotifier::new("https://hooks.example.com/T000").is_ok());

        let config = AlertConfig {
            console: true,
            file_path: None,
            webhook_url: Some("not a url".to_string()),
        };
        assert_eq!(AlertService::new(&config).channel_names(), vec!["console"]);
    }

    #[tokio::test]
    async fn test_decline_alerts_reach_every_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let service = AlertService::with_channels(vec![
            Box::new(Broken),
            Box::new(Recording { seen: seen.clone() }),
        ]);

        let sent = service
            .send_decline_alerts(&[event("Ha Noi", -12.0), event("Hue", -3.0)])
            .await;

        assert_eq!(sent, 2);
        // a failing channel does not stop the others
        assert_eq!(seen.lock().unwrap().len(), 2);
        let history = service.history();
        assert_eq!(history[0].level, AlertLevel::Critical);
        assert_eq!(history[1].level, AlertLevel::Info);
    }

    #[tokio::test]
    async fn test_recent_filters_by_age() {
        let service = AlertService::with_channels(Vec::new());
        service.send_alert_async(&Alert::decline(&event("A", -6.0))).await;

        let mut old = Alert::decline(&event("B", -6.0));
        old.timestamp = Utc::now() - Duration::hours(30);
        service.send_alert_async(&old).await;

        assert_eq!(service.history().len(), 2);
        let recent = service.recent(24);
        assert_eq!(recent.len(), 1);
        match &recent[0].alert_type {
            AlertType::KpiDecline(e) => assert_eq!(e.entity_id, "A"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_fire_and_forget_records_history() {
        let service = AlertService::with_channels(Vec::new());
        tokio_test::block_on(async {
            service.send_alert(Alert::decline(&event("A", -20.0)));
            tokio::task::yield_now().await;
        });
        assert_eq!(service.history().len(), 1);
    }

    #[test]
    fn test_run_summary_alert() {
        let report = decline_detector::DeclineReportBuilder::new().build();
        let alert = Alert::run_summary(&report);
        assert_eq!(alert.level, AlertLevel::Info);
        match alert.alert_type {
            AlertType::RunSummary { events, .. } => assert_eq!(events, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
