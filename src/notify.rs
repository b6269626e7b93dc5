use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::TrackedPage;

/// Human-facing change severity, derived from the presentational change
/// percentage rather than the significance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Major,
    Moderate,
    Minor,
}

impl Severity {
    pub fn classify(change_percentage: f64) -> Self {
        if change_percentage > 50.0 {
            Severity::Major
        } else if change_percentage > 20.0 {
            Severity::Moderate
        } else {
            Severity::Minor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Major => "major",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
        }
    }
}

/// Outbound notification payload for a detected change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotification {
    pub page_id: i64,
    pub url: String,
    pub display_name: String,
    pub significance_score: f64,
    pub change_percentage: f64,
    pub severity: Severity,
    pub previous_length: usize,
    pub new_length: usize,
}

/// Fire-and-forget notification sink. Failures are reported to the caller
/// for logging but never escalate past it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &ChangeNotification) -> Result<bool>;
}

/// Default sink: records the change in the log and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &ChangeNotification) -> Result<bool> {
        tracing::info!(
            page_id = notification.page_id,
            url = %notification.url,
            severity = notification.severity.as_str(),
            score = notification.significance_score,
            change = format!("{:.1}%", notification.change_percentage),
            "{} -> {} chars",
            notification.previous_length,
            notification.new_length,
        );
        Ok(true)
    }
}

/// POSTs the notification as JSON to a configured endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, endpoint }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &ChangeNotification) -> Result<bool> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(true)
        } else {
            tracing::warn!(
                status = %response.status(),
                endpoint = %self.endpoint,
                "Webhook notification rejected"
            );
            Ok(false)
        }
    }
}

impl ChangeNotification {
    pub fn new(
        page: &TrackedPage,
        significance_score: f64,
        change_percentage: f64,
        previous_length: usize,
        new_length: usize,
    ) -> Self {
        Self {
            page_id: page.id,
            url: page.url.clone(),
            display_name: page.display_name.clone(),
            significance_score,
            change_percentage,
            severity: Severity::classify(change_percentage),
            previous_length,
            new_length,
        }
    }
}
