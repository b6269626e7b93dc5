use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate statistics describing how two text blobs differ.
///
/// Percentages are expressed 0-100 here; the significance score works on
/// a 0-1 scale and clamps each signal before weighting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeMetrics {
    /// Distinct words present in the new text but not the old.
    pub words_added: usize,
    /// Distinct words present in the old text but not the new.
    pub words_removed: usize,
    pub total_words_old: usize,
    pub total_words_new: usize,
    /// Character-level similarity ratio, 0-100.
    pub similarity_score: f64,
    /// 100 minus the similarity ratio.
    pub change_percentage: f64,
    /// Line count growth; zero when the text shrank. Only the growing
    /// direction is reported, so at most one of these is non-zero.
    pub lines_added: usize,
    /// Line count shrinkage; zero when the text grew.
    pub lines_removed: usize,
    /// Number of significant-keyword presence flips between the two texts.
    #[serde(default)]
    pub keyword_changes: usize,
}

/// An immutable snapshot of a page's content at one point in time.
///
/// Created only through the significance pipeline and destroyed only by
/// pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersion {
    pub id: i64,
    pub page_id: i64,
    pub timestamp: DateTime<Utc>,
    pub text_content: String,
    pub html_content: Option<String>,
    /// SHA-256 hex digest; the durable identity of this content.
    pub content_hash: String,
    /// MD5 hex digest; fast pre-filter only, never authoritative.
    pub checksum: String,
    pub significance_score: f64,
    pub metrics: ChangeMetrics,
    pub store_reason: String,
    pub previous_version_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPageVersion {
    pub page_id: i64,
    pub timestamp: DateTime<Utc>,
    pub text_content: String,
    pub html_content: Option<String>,
    pub content_hash: String,
    pub checksum: String,
    pub significance_score: f64,
    pub metrics: ChangeMetrics,
    pub store_reason: String,
    pub previous_version_id: Option<i64>,
}

/// Per-page version statistics for the observability surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    pub total_versions: usize,
    /// Versions scoring at or above the significance threshold.
    pub significant_versions: usize,
    pub average_score: f64,
    pub storage_bytes: u64,
}

impl PageStats {
    /// Fraction of stored versions that are significant.
    pub fn storage_efficiency(&self) -> f64 {
        if self.total_versions == 0 {
            0.0
        } else {
            self.significant_versions as f64 / self.total_versions as f64
        }
    }
}
