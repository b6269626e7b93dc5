use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    ContentChanged,
    ManualCheck,
    NewPage,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::ContentChanged => "content_changed",
            ChangeType::ManualCheck => "manual_check",
            ChangeType::NewPage => "new_page",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual_check" => ChangeType::ManualCheck,
            "new_page" => ChangeType::NewPage,
            _ => ChangeType::ContentChanged,
        }
    }
}

/// Details blob stored alongside each change log entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeDetails {
    pub url: String,
    pub content_length: usize,
    pub previous_length: usize,
    /// Human-facing percentage, 0-100. Computed on a presentational path
    /// independent from the significance score.
    pub change_percentage: f64,
    pub significance_score: f64,
    pub notification_sent: bool,
    pub version_id: Option<i64>,
}

/// One entry per accepted version, recording what changed and whether a
/// notification fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub page_id: i64,
    pub owner: Option<String>,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub details: ChangeDetails,
}
