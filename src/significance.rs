//! Converts diff metrics into a single 0..1 significance score and a
//! store/skip decision with human-readable reasons.

use serde::{Deserialize, Serialize};

use crate::diff::{self, KeywordChange};
use crate::fingerprint;
use crate::models::{ChangeMetrics, VersioningConfig};

/// Canonical weighting: character dissimilarity 40%, word change 30%,
/// structural line change 20%, keyword flips 10% cap.
const CHAR_WEIGHT: f64 = 0.4;
const WORD_WEIGHT: f64 = 0.3;
const LINE_WEIGHT: f64 = 0.2;
const KEYWORD_WEIGHT_PER_FLIP: f64 = 0.05;
const KEYWORD_WEIGHT_CAP: f64 = 0.1;

/// Line-change fraction above which the structural signal is worth a reason.
const LINE_CHANGE_MENTION_THRESHOLD: f64 = 0.1;

/// Immutable result of analyzing one old/new text pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceAnalysis {
    pub store: bool,
    pub reason: String,
    pub score: f64,
    pub content_hash: String,
    pub checksum: String,
    pub metrics: ChangeMetrics,
    pub keyword_changes: Vec<KeywordChange>,
    pub first_version: bool,
}

/// Decide whether the change from `old_text` to `new_text` is significant
/// enough to store, under the given per-page config.
pub fn analyze(old_text: &str, new_text: &str, config: &VersioningConfig) -> SignificanceAnalysis {
    let content_hash = fingerprint::content_hash(new_text);
    let new_checksum = fingerprint::checksum(new_text);

    // First version: always stored at full score.
    if old_text.is_empty() && !new_text.is_empty() {
        return SignificanceAnalysis {
            store: true,
            reason: "First version".to_string(),
            score: 1.0,
            content_hash,
            checksum: new_checksum,
            metrics: diff::calculate_change_metrics("", new_text),
            keyword_changes: Vec::new(),
            first_version: true,
        };
    }

    // Identical content never creates a version.
    if old_text == new_text {
        return SignificanceAnalysis {
            store: false,
            reason: "Identical content".to_string(),
            score: 0.0,
            content_hash,
            checksum: new_checksum,
            metrics: ChangeMetrics {
                similarity_score: 100.0,
                total_words_old: old_text.split_whitespace().count(),
                total_words_new: new_text.split_whitespace().count(),
                ..ChangeMetrics::default()
            },
            keyword_changes: Vec::new(),
            first_version: false,
        };
    }

    // Checksum pre-filter skips the full diff for byte-identical content
    // that reached us through different buffers.
    if fingerprint::checksum(old_text) == new_checksum {
        return SignificanceAnalysis {
            store: false,
            reason: "Identical checksum".to_string(),
            score: 0.0,
            content_hash,
            checksum: new_checksum,
            metrics: ChangeMetrics {
                similarity_score: 100.0,
                ..ChangeMetrics::default()
            },
            keyword_changes: Vec::new(),
            first_version: false,
        };
    }

    let mut metrics = diff::calculate_change_metrics(old_text, new_text);
    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    // 1. Character-level change
    let char_signal = (metrics.change_percentage / 100.0).clamp(0.0, 1.0);
    score += char_signal * CHAR_WEIGHT;
    if metrics.change_percentage >= config.min_change_threshold * 100.0 {
        reasons.push(format!(
            "Text changed by {:.1}%",
            metrics.change_percentage
        ));
    }

    // 2. Word-level change
    let total_words = metrics.total_words_old.max(metrics.total_words_new).max(1);
    let word_change = (metrics.words_added + metrics.words_removed) as f64 / total_words as f64;
    let word_signal = word_change.clamp(0.0, 1.0);
    score += word_signal * WORD_WEIGHT;
    if word_change >= config.min_change_threshold {
        reasons.push(format!("{:.0}% of words changed", word_change * 100.0));
    }

    // 3. Structural change
    if config.check_structural_changes {
        let old_lines = old_text.lines().count().max(1);
        let line_delta = metrics.lines_added.abs_diff(metrics.lines_removed);
        let line_change = line_delta as f64 / old_lines as f64;
        let line_signal = line_change.clamp(0.0, 1.0);
        score += line_signal * LINE_WEIGHT;
        if line_change >= LINE_CHANGE_MENTION_THRESHOLD {
            reasons.push(format!(
                "Line count changed by {:.0}%",
                line_change * 100.0
            ));
        }
    }

    // 4. Significant keywords
    let keyword_changes = if config.require_significant_keywords {
        let flips = diff::scan_keyword_changes(old_text, new_text);
        for flip in &flips {
            let direction = if flip.appeared {
                "appeared"
            } else {
                "disappeared"
            };
            reasons.push(format!("Keyword '{}' {}", flip.keyword, direction));
        }
        let keyword_signal =
            (flips.len() as f64 * KEYWORD_WEIGHT_PER_FLIP).min(KEYWORD_WEIGHT_CAP);
        score += keyword_signal;
        flips
    } else {
        Vec::new()
    };
    metrics.keyword_changes = keyword_changes.len();

    let score = (score * 1000.0).round() / 1000.0;
    let store = score >= config.min_change_threshold;

    SignificanceAnalysis {
        store,
        reason: if reasons.is_empty() {
            "Minor changes".to_string()
        } else {
            reasons.join("; ")
        },
        score,
        content_hash,
        checksum: new_checksum,
        metrics,
        keyword_changes,
        first_version: false,
    }
}
