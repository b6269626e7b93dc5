//! Version store orchestration: duplicate suppression, append-only version
//! creation, and bounded retention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::db::{Repository, VersionSummary};
use crate::error::Result;
use crate::fingerprint;
use crate::models::{NewPageVersion, PageStats, PageVersion, PruneStrategy, TrackedPage};
use crate::significance::{self, SignificanceAnalysis};

/// Versions scoring at or above this survive pruning regardless of age.
/// Independent of the per-page storage threshold.
pub const SIGNIFICANT_SCORE_THRESHOLD: f64 = 0.3;

pub struct VersionStore {
    repo: Arc<Repository>,
    /// Per-page guards serializing read-latest -> analyze -> write, so an
    /// overlapping manual and scheduled check cannot both see the same
    /// "latest" and both insert.
    page_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl VersionStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            page_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn page_lock(&self, page_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.page_locks.lock().expect("page lock map poisoned");
        locks
            .entry(page_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run the significance pipeline for newly fetched content and store a
    /// version only when the change is significant.
    ///
    /// Returns the new version id, or `None` when the check was absorbed
    /// (in which case only `last_checked` advances).
    pub async fn save_if_significant(
        &self,
        page: &TrackedPage,
        new_text: &str,
        html_content: Option<String>,
    ) -> Result<Option<i64>> {
        let lock = self.page_lock(page.id);
        let _guard = lock.lock().await;

        let latest = self.repo.latest_version(page.id).await?;
        let old_text = latest
            .as_ref()
            .map(|v| v.text_content.as_str())
            .unwrap_or("");

        if let Some(latest) = &latest {
            // The stored checksum is advisory; if it drifted from the
            // stored text, recompute instead of trusting it.
            let recomputed = fingerprint::checksum(&latest.text_content);
            if latest.checksum != recomputed {
                tracing::warn!(
                    page_id = page.id,
                    version_id = latest.id,
                    "Stale checksum on stored version; recomputed from content"
                );
            }
        }

        let analysis = significance::analyze(old_text, new_text, &page.config);

        if !analysis.store {
            self.repo.touch_last_checked(page.id).await?;
            tracing::debug!(
                page_id = page.id,
                score = analysis.score,
                "Skipping version: {}",
                analysis.reason
            );
            return Ok(None);
        }

        let version_id = self
            .repo
            .insert_version(new_version(page.id, new_text, html_content, &analysis, &latest))
            .await?;

        // Page pointer moves together with the insert; a failure here
        // surfaces as an error before anything observes the new version.
        self.repo.mark_change_detected(page.id, version_id).await?;

        tracing::info!(
            page_id = page.id,
            version_id,
            score = analysis.score,
            "Saved version: {}",
            analysis.reason
        );

        let pruned = self.prune_old_versions(page.id, &page.config).await?;
        if pruned > 0 {
            tracing::info!(page_id = page.id, pruned, "Pruned old versions");
        }

        Ok(Some(version_id))
    }

    /// Enforce the retention cap for one page. Lossy: versions outside the
    /// keep-set are deleted permanently.
    pub async fn prune_old_versions(
        &self,
        page_id: i64,
        config: &crate::models::VersioningConfig,
    ) -> Result<usize> {
        let all = self.repo.version_summaries(page_id).await?;
        if all.len() <= config.max_versions_kept {
            return Ok(0);
        }

        let keep = keep_set(&all, config.max_versions_kept, config.prune_strategy);

        let doomed: Vec<i64> = all
            .iter()
            .map(|v| v.id)
            .filter(|id| !keep.contains(id))
            .collect();

        self.repo.delete_versions(doomed).await
    }

    pub async fn latest_version(
        &self,
        page_id: i64,
        significant_only: bool,
    ) -> Result<Option<PageVersion>> {
        if significant_only {
            self.repo
                .latest_significant_version(page_id, SIGNIFICANT_SCORE_THRESHOLD)
                .await
        } else {
            self.repo.latest_version(page_id).await
        }
    }

    pub async fn version_by_id(&self, version_id: i64) -> Result<Option<PageVersion>> {
        self.repo.get_version(version_id).await
    }

    pub async fn previous_version(
        &self,
        page_id: i64,
        version: &PageVersion,
    ) -> Result<Option<PageVersion>> {
        self.repo.previous_version(page_id, version).await
    }

    pub async fn stats(&self, page_id: i64) -> Result<PageStats> {
        self.repo
            .page_stats(page_id, SIGNIFICANT_SCORE_THRESHOLD)
            .await
    }
}

fn new_version(
    page_id: i64,
    new_text: &str,
    html_content: Option<String>,
    analysis: &SignificanceAnalysis,
    previous: &Option<PageVersion>,
) -> NewPageVersion {
    NewPageVersion {
        page_id,
        timestamp: Utc::now(),
        text_content: new_text.to_string(),
        html_content,
        content_hash: analysis.content_hash.clone(),
        checksum: analysis.checksum.clone(),
        significance_score: analysis.score,
        metrics: analysis.metrics.clone(),
        store_reason: analysis.reason.clone(),
        previous_version_id: previous.as_ref().map(|v| v.id),
    }
}

/// Compute the ids that survive pruning. `summaries` is newest first.
///
/// `SignificantOnly`: the oldest version anchors history, every version at
/// or above the significance threshold stays, then remaining slots fill
/// with a fixed stride across the timeline. `TimeBased` skips the score
/// step. `All` keeps only the newest `cap` versions.
fn keep_set(summaries: &[VersionSummary], cap: usize, strategy: PruneStrategy) -> Vec<i64> {
    if strategy == PruneStrategy::All {
        return summaries.iter().take(cap).map(|v| v.id).collect();
    }

    let mut keep: Vec<i64> = Vec::new();

    if let Some(oldest) = summaries.last() {
        keep.push(oldest.id);
    }

    if strategy == PruneStrategy::SignificantOnly {
        for version in summaries {
            if version.significance_score >= SIGNIFICANT_SCORE_THRESHOLD
                && !keep.contains(&version.id)
            {
                keep.push(version.id);
            }
        }
    }

    if keep.len() < cap {
        let span = summaries.len();
        let step = (span / (cap - keep.len())).max(1);
        for i in (0..span).step_by(step) {
            if keep.len() >= cap {
                break;
            }
            let id = summaries[i].id;
            if !keep.contains(&id) {
                keep.push(id);
            }
        }
    }

    keep.truncate(cap);
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTrackedPage, VersioningConfig};
    use chrono::Duration;

    async fn test_store() -> (VersionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.expect("repo");
        (VersionStore::new(Arc::new(repo)), dir)
    }

    async fn tracked_page(store: &VersionStore, url: &str) -> TrackedPage {
        let id = store
            .repository()
            .insert_page(NewTrackedPage::new(
                url.to_string(),
                VersioningConfig::default(),
            ))
            .await
            .expect("insert page");
        store
            .repository()
            .get_page(id)
            .await
            .expect("get page")
            .expect("page exists")
    }

    #[tokio::test]
    async fn first_fetch_creates_a_full_score_version() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/a").await;

        let version_id = store
            .save_if_significant(&page, "Hello world", None)
            .await
            .expect("save")
            .expect("stored");

        let version = store
            .version_by_id(version_id)
            .await
            .expect("query")
            .expect("found");
        assert_eq!(version.significance_score, 1.0);
        assert_eq!(version.store_reason, "First version");
        assert_eq!(version.previous_version_id, None);

        let page = store
            .repository()
            .get_page(page.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.current_version_id, Some(version_id));
        assert!(page.last_checked.is_some());
        assert!(page.last_change_detected.is_some());
    }

    #[tokio::test]
    async fn identical_content_is_absorbed_without_a_version() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/b").await;

        store
            .save_if_significant(&page, "same text", None)
            .await
            .expect("save")
            .expect("first stored");

        let second = store
            .save_if_significant(&page, "same text", None)
            .await
            .expect("save");
        assert_eq!(second, None);
        assert_eq!(store.repository().count_versions(page.id).await.unwrap(), 1);

        // last_checked still advanced on the skip
        let page = store
            .repository()
            .get_page(page.id)
            .await
            .unwrap()
            .unwrap();
        assert!(page.last_checked.is_some());
    }

    #[tokio::test]
    async fn significant_change_links_to_previous_version() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/c").await;

        let first = store
            .save_if_significant(&page, "critical security patch released today", None)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .save_if_significant(&page, "routine update released", None)
            .await
            .unwrap()
            .expect("keyword flips make this significant");

        let version = store.version_by_id(second).await.unwrap().unwrap();
        assert_eq!(version.previous_version_id, Some(first));
        assert!(version.metrics.keyword_changes > 0);

        let previous = store
            .previous_version(page.id, &version)
            .await
            .unwrap()
            .expect("previous exists");
        assert_eq!(previous.id, first);
    }

    #[tokio::test]
    async fn insignificant_edit_is_skipped() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/d").await;

        let body: String = (0..200).map(|i| format!("stable paragraph {i}\n")).collect();
        store
            .save_if_significant(&page, &body, None)
            .await
            .unwrap()
            .unwrap();

        let mut tweaked = body.clone();
        tweaked.push_str("tail\n");
        let result = store.save_if_significant(&page, &tweaked, None).await.unwrap();
        assert_eq!(result, None);
    }

    fn summaries(scores: &[f64]) -> Vec<VersionSummary> {
        // Newest first, ids ascending with age descending
        let base = Utc::now();
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| VersionSummary {
                id: (scores.len() - i) as i64,
                timestamp: base - Duration::hours(i as i64),
                significance_score: score,
            })
            .collect()
    }

    #[test]
    fn keep_set_caps_and_anchors_oldest() {
        // 60 versions, 5 significant, cap 50
        let mut scores = vec![0.1; 60];
        for i in [3, 10, 20, 30, 40] {
            scores[i] = 0.5;
        }
        let all = summaries(&scores);
        let keep = keep_set(&all, 50, PruneStrategy::SignificantOnly);

        assert_eq!(keep.len(), 50);
        // Oldest (id 1) is always retained
        assert!(keep.contains(&1));
        // All significant versions are retained
        for i in [3usize, 10, 20, 30, 40] {
            assert!(keep.contains(&all[i].id), "significant version {i} evicted");
        }
    }

    #[test]
    fn keep_set_all_strategy_keeps_newest() {
        let all = summaries(&vec![0.9; 10]);
        let keep = keep_set(&all, 4, PruneStrategy::All);
        assert_eq!(keep, vec![10, 9, 8, 7]);
    }

    #[test]
    fn keep_set_time_based_ignores_scores() {
        let mut scores = vec![0.0; 20];
        scores[5] = 0.9;
        let all = summaries(&scores);
        let keep = keep_set(&all, 5, PruneStrategy::TimeBased);
        assert_eq!(keep.len(), 5);
        assert!(keep.contains(&1)); // oldest anchor
    }

    #[tokio::test]
    async fn pruning_enforces_the_retention_cap() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/e").await;

        // Insert 60 versions directly; 5 score above the significance
        // threshold, the rest just below the storage cutoff's radar.
        let base = Utc::now() - Duration::days(60);
        let mut significant_ids = Vec::new();
        for i in 0..60 {
            let score = if i % 12 == 5 { 0.6 } else { 0.1 };
            let text = format!("content revision {i}");
            let id = store
                .repository()
                .insert_version(NewPageVersion {
                    page_id: page.id,
                    timestamp: base + Duration::hours(i),
                    text_content: text.clone(),
                    html_content: None,
                    content_hash: crate::fingerprint::content_hash(&text),
                    checksum: crate::fingerprint::checksum(&text),
                    significance_score: score,
                    metrics: Default::default(),
                    store_reason: "test".into(),
                    previous_version_id: None,
                })
                .await
                .unwrap();
            if score >= SIGNIFICANT_SCORE_THRESHOLD {
                significant_ids.push(id);
            }
        }
        assert_eq!(significant_ids.len(), 5);

        let oldest = store
            .repository()
            .version_summaries(page.id)
            .await
            .unwrap()
            .last()
            .unwrap()
            .id;

        let pruned = store
            .prune_old_versions(page.id, &page.config)
            .await
            .unwrap();
        assert_eq!(pruned, 10);
        assert_eq!(
            store.repository().count_versions(page.id).await.unwrap(),
            50
        );

        let remaining: Vec<i64> = store
            .repository()
            .version_summaries(page.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert!(remaining.contains(&oldest));
        for id in significant_ids {
            assert!(remaining.contains(&id), "significant version {id} pruned");
        }
    }

    #[tokio::test]
    async fn pruning_under_cap_is_a_noop() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/f").await;
        store
            .save_if_significant(&page, "only version", None)
            .await
            .unwrap();
        let pruned = store
            .prune_old_versions(page.id, &page.config)
            .await
            .unwrap();
        assert_eq!(pruned, 0);
    }

    #[tokio::test]
    async fn stats_report_counts_and_efficiency() {
        let (store, _dir) = test_store().await;
        let page = tracked_page(&store, "https://example.com/g").await;

        store
            .save_if_significant(&page, "first body of text", None)
            .await
            .unwrap()
            .unwrap(); // score 1.0, significant

        let stats = store.stats(page.id).await.unwrap();
        assert_eq!(stats.total_versions, 1);
        assert_eq!(stats.significant_versions, 1);
        assert!(stats.average_score >= 0.99);
        assert!(stats.storage_bytes > 0);
        assert_eq!(stats.storage_efficiency(), 1.0);
    }

    #[tokio::test]
    async fn concurrent_saves_for_one_page_serialize() {
        let (store, _dir) = test_store().await;
        let store = Arc::new(store);
        let page = tracked_page(&store, "https://example.com/h").await;

        // Two identical payloads racing: exactly one version must win.
        let a = {
            let store = store.clone();
            let page = page.clone();
            tokio::spawn(async move { store.save_if_significant(&page, "racing body", None).await })
        };
        let b = {
            let store = store.clone();
            let page = page.clone();
            tokio::spawn(async move { store.save_if_significant(&page, "racing body", None).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert!(a.is_some() ^ b.is_some(), "exactly one save must store");
        assert_eq!(store.repository().count_versions(page.id).await.unwrap(), 1);
    }
}
