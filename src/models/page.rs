use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the version store decides which historical versions survive pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneStrategy {
    /// Keep the oldest version, every significant version, then fill the
    /// remaining slots with time-spread samples.
    #[default]
    SignificantOnly,
    /// Keep only the newest versions up to the cap.
    All,
    /// Keep the oldest version plus time-spread samples, ignoring scores.
    TimeBased,
}

impl PruneStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruneStrategy::SignificantOnly => "significant_only",
            PruneStrategy::All => "all",
            PruneStrategy::TimeBased => "time_based",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "all" => PruneStrategy::All,
            "time_based" => PruneStrategy::TimeBased,
            _ => PruneStrategy::SignificantOnly,
        }
    }
}

/// Per-page versioning settings. Fully populated when the page is created,
/// so there is never a missing field to default at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Minimum significance score (0..1) required to store a new version.
    #[serde(default = "default_min_change_threshold")]
    pub min_change_threshold: f64,

    /// Whether keyword presence flips contribute to the score.
    #[serde(default = "default_true")]
    pub require_significant_keywords: bool,

    /// Retention cap enforced by pruning.
    #[serde(default = "default_max_versions_kept")]
    pub max_versions_kept: usize,

    /// Whether line-count changes contribute to the score.
    #[serde(default = "default_true")]
    pub check_structural_changes: bool,

    #[serde(default)]
    pub prune_strategy: PruneStrategy,

    /// Minimum score (0..1) required to trigger a notification.
    #[serde(default = "default_notification_threshold")]
    pub notification_threshold: f64,
}

fn default_min_change_threshold() -> f64 {
    0.05
}

fn default_max_versions_kept() -> usize {
    50
}

fn default_notification_threshold() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            min_change_threshold: default_min_change_threshold(),
            require_significant_keywords: true,
            max_versions_kept: default_max_versions_kept(),
            check_structural_changes: true,
            prune_strategy: PruneStrategy::default(),
            notification_threshold: default_notification_threshold(),
        }
    }
}

/// A URL under monitoring, with its polling interval and versioning config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPage {
    pub id: i64,
    pub url: String,
    pub display_name: String,
    /// Opaque owner identity; user management lives outside this crate.
    pub owner: Option<String>,
    pub check_interval_minutes: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_change_detected: Option<DateTime<Utc>>,
    pub current_version_id: Option<i64>,
    pub config: VersioningConfig,
}

impl TrackedPage {
    /// A page is due when it has never been checked or its interval has
    /// elapsed since the last check.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => now >= last + chrono::Duration::minutes(self.check_interval_minutes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTrackedPage {
    pub url: String,
    pub display_name: String,
    pub owner: Option<String>,
    pub check_interval_minutes: i64,
    pub config: VersioningConfig,
}

impl NewTrackedPage {
    pub fn new(url: String, config: VersioningConfig) -> Self {
        Self {
            display_name: url.clone(),
            url,
            owner: None,
            check_interval_minutes: 1440,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_checked_page_is_due() {
        let page = TrackedPage {
            id: 1,
            url: "https://example.com".into(),
            display_name: "example".into(),
            owner: None,
            check_interval_minutes: 60,
            is_active: true,
            created_at: Utc::now(),
            last_checked: None,
            last_change_detected: None,
            current_version_id: None,
            config: VersioningConfig::default(),
        };
        assert!(page.is_due(Utc::now()));
    }

    #[test]
    fn due_respects_interval_and_active_flag() {
        let now = Utc::now();
        let mut page = TrackedPage {
            id: 1,
            url: "https://example.com".into(),
            display_name: "example".into(),
            owner: None,
            check_interval_minutes: 60,
            is_active: true,
            created_at: now,
            last_checked: Some(now - chrono::Duration::minutes(30)),
            last_change_detected: None,
            current_version_id: None,
            config: VersioningConfig::default(),
        };
        assert!(!page.is_due(now));

        page.last_checked = Some(now - chrono::Duration::minutes(61));
        assert!(page.is_due(now));

        page.is_active = false;
        assert!(!page.is_due(now));
    }

    #[test]
    fn prune_strategy_round_trips() {
        for strategy in [
            PruneStrategy::SignificantOnly,
            PruneStrategy::All,
            PruneStrategy::TimeBased,
        ] {
            assert_eq!(PruneStrategy::parse(strategy.as_str()), strategy);
        }
        // Unknown strings fall back to the default strategy
        assert_eq!(
            PruneStrategy::parse("bogus"),
            PruneStrategy::SignificantOnly
        );
    }
}
