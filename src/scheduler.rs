//! Background monitoring loop: finds due pages, fans out bounded
//! concurrent checks, and feeds results through the version store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::Repository;
use crate::diff;
use crate::error::{AppError, Result};
use crate::fetch::PageFetcher;
use crate::models::{ChangeDetails, ChangeType, TrackedPage};
use crate::notify::{ChangeNotification, Notifier};
use crate::store::VersionStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: Duration,
    pub max_concurrent_checks: usize,
    pub maintenance_every_ticks: u32,
    pub change_log_retention_days: i64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_concurrent_checks: 5,
            maintenance_every_ticks: 10,
            change_log_retention_days: 90,
        }
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MonitoringScheduler {
    repo: Arc<Repository>,
    store: Arc<VersionStore>,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    options: SchedulerOptions,
    running: AtomicBool,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl MonitoringScheduler {
    pub fn new(
        repo: Arc<Repository>,
        store: Arc<VersionStore>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            repo,
            store,
            fetcher,
            notifier,
            options,
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    /// Spawn the background loop. No-op while already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler is already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_loop(shutdown_rx).await;
        });

        *self.loop_handle.lock().expect("loop handle poisoned") = Some(LoopHandle {
            shutdown: shutdown_tx,
            handle,
        });
        tracing::info!("Monitoring scheduler started");
    }

    /// Cancel the loop and wait for it to exit. The in-flight page batch
    /// is allowed to finish; shutdown is bounded by a timeout either way.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let loop_handle = self.loop_handle.lock().expect("loop handle poisoned").take();
        if let Some(LoopHandle { shutdown, handle }) = loop_handle {
            let _ = shutdown.send(true);
            let mut handle = handle;
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("Scheduler loop did not exit in time; aborting");
                handle.abort();
            }
        }
        tracing::info!("Monitoring scheduler stopped");
    }

    /// Alias for `stop()`.
    pub async fn shutdown(&self) {
        self.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.options.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_due_pages().await;

                    ticks = ticks.wrapping_add(1);
                    if self.options.maintenance_every_ticks > 0
                        && ticks % self.options.maintenance_every_ticks == 0
                    {
                        self.run_maintenance().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Scheduler loop exited");
    }

    /// One tick: fetch and process every due page with bounded concurrency.
    /// Individual page failures are logged and never break the batch.
    async fn check_due_pages(&self) {
        let pages = match self.repo.get_active_pages().await {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!("Failed to load active pages: {}", e);
                return;
            }
        };

        let now = Utc::now();
        let due: Vec<TrackedPage> = pages.into_iter().filter(|p| p.is_due(now)).collect();
        if due.is_empty() {
            return;
        }
        tracing::debug!("Checking {} due pages", due.len());

        stream::iter(due)
            .map(|page| async move {
                let page_id = page.id;
                let url = page.url.clone();
                if let Err(e) = self.run_check(page, ChangeType::ContentChanged).await {
                    tracing::error!(page_id, url = %url, "Page check failed: {}", e);
                }
            })
            .buffer_unordered(self.options.max_concurrent_checks)
            .collect::<Vec<()>>()
            .await;
    }

    /// Check one page end to end. Fetch failures advance `last_checked`
    /// and stop there; an insignificant change stops after the skip; a
    /// stored version then gets its notification and change log entry,
    /// each failing independently of the other.
    pub async fn run_check(
        &self,
        page: TrackedPage,
        change_type: ChangeType,
    ) -> Result<Option<i64>> {
        let fetched = match self.fetcher.fetch(&page.url).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::warn!(page_id = page.id, url = %page.url, "Fetch returned no content");
                self.repo.touch_last_checked(page.id).await?;
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(page_id = page.id, url = %page.url, "Fetch failed: {}", e);
                self.repo.touch_last_checked(page.id).await?;
                return Ok(None);
            }
        };

        let Some(version_id) = self
            .store
            .save_if_significant(&page, &fetched.text, fetched.html)
            .await?
        else {
            tracing::debug!(page_id = page.id, url = %page.url, "Skipped insignificant change");
            return Ok(None);
        };

        let version = self
            .store
            .version_by_id(version_id)
            .await?
            .ok_or(AppError::VersionNotFound(version_id))?;

        let previous = self.store.previous_version(page.id, &version).await?;
        let old_text = previous
            .as_ref()
            .map(|v| v.text_content.as_str())
            .unwrap_or("");

        let change_percentage = presentational_change_percentage(old_text, &fetched.text);

        let notified = if version.significance_score >= page.config.notification_threshold {
            let notification = ChangeNotification::new(
                &page,
                version.significance_score,
                change_percentage,
                old_text.len(),
                fetched.text.len(),
            );
            match self.notifier.notify(&notification).await {
                Ok(sent) => sent,
                Err(e) => {
                    // Already-persisted version and change log are kept.
                    tracing::warn!(page_id = page.id, "Notification failed: {}", e);
                    false
                }
            }
        } else {
            false
        };

        let details = ChangeDetails {
            url: page.url.clone(),
            content_length: fetched.text.len(),
            previous_length: old_text.len(),
            change_percentage,
            significance_score: version.significance_score,
            notification_sent: notified,
            version_id: Some(version_id),
        };
        if let Err(e) = self
            .repo
            .insert_change_log(page.id, page.owner.clone(), change_type, &details)
            .await
        {
            tracing::error!(page_id = page.id, "Failed to write change log: {}", e);
        }

        Ok(Some(version_id))
    }

    /// Manually trigger a check outside the schedule.
    pub async fn check_page_now(&self, page_id: i64) -> Result<Option<i64>> {
        let page = self
            .repo
            .get_page(page_id)
            .await?
            .ok_or(AppError::PageNotFound(page_id))?;
        self.run_check(page, ChangeType::ManualCheck).await
    }

    /// Periodic maintenance. Sub-tasks are isolated: one failing never
    /// prevents the other from running.
    async fn run_maintenance(&self) {
        tracing::debug!("Running maintenance tasks");

        match self.cleanup_change_logs().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Cleaned {} old change log entries", n),
            Err(e) => tracing::error!("Change log cleanup failed: {}", e),
        }

        match self.prune_all_pages().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Prune sweep removed {} versions", n),
            Err(e) => tracing::error!("Prune sweep failed: {}", e),
        }
    }

    async fn cleanup_change_logs(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.options.change_log_retention_days);
        self.repo.delete_change_logs_older_than(cutoff).await
    }

    /// Re-run pruning across all active pages, isolating per-page errors.
    async fn prune_all_pages(&self) -> Result<usize> {
        let pages = self.repo.get_active_pages().await?;
        let mut total = 0;
        for page in pages {
            match self.store.prune_old_versions(page.id, &page.config).await {
                Ok(pruned) => total += pruned,
                Err(e) => {
                    tracing::error!(page_id = page.id, "Pruning failed: {}", e);
                }
            }
        }
        Ok(total)
    }
}

/// Human-facing change percentage for notifications and change logs.
/// Char-similarity based and deliberately independent from the
/// significance score.
fn presentational_change_percentage(old_text: &str, new_text: &str) -> f64 {
    if old_text.is_empty() {
        return 100.0;
    }
    if new_text.is_empty() {
        return 0.0;
    }
    let change = (1.0 - diff::char_similarity(old_text, new_text)) * 100.0;
    (change * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedContent;
    use crate::models::{NewTrackedPage, VersioningConfig};
    use std::collections::HashMap;

    struct MockFetcher {
        responses: Mutex<HashMap<String, Option<String>>>,
    }

    impl MockFetcher {
        fn new(responses: &[(&str, Option<&str>)]) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .iter()
                        .map(|(url, text)| (url.to_string(), text.map(String::from)))
                        .collect(),
                ),
            }
        }

        fn set(&self, url: &str, text: Option<&str>) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), text.map(String::from));
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<Option<FetchedContent>> {
            let text = self.responses.lock().unwrap().get(url).cloned().flatten();
            Ok(text.map(|text| FetchedContent { html: None, text }))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<ChangeNotification>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &ChangeNotification) -> Result<bool> {
            if self.fail {
                return Err(anyhow::anyhow!("notifier unavailable").into());
            }
            self.calls.lock().unwrap().push(notification.clone());
            Ok(true)
        }
    }

    struct Harness {
        scheduler: Arc<MonitoringScheduler>,
        repo: Arc<Repository>,
        fetcher: Arc<MockFetcher>,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    async fn harness(fetcher: MockFetcher, notifier: RecordingNotifier) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let repo = Arc::new(Repository::new(path.to_str().unwrap()).await.expect("repo"));
        let store = Arc::new(VersionStore::new(repo.clone()));
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(notifier);
        let scheduler = Arc::new(MonitoringScheduler::new(
            repo.clone(),
            store,
            fetcher.clone(),
            notifier.clone(),
            SchedulerOptions {
                poll_interval: Duration::from_secs(3600),
                ..SchedulerOptions::default()
            },
        ));
        Harness {
            scheduler,
            repo,
            fetcher,
            notifier,
            _dir: dir,
        }
    }

    async fn add_page(h: &Harness, url: &str, config: VersioningConfig) -> TrackedPage {
        let id = h
            .repo
            .insert_page(NewTrackedPage::new(url.to_string(), config))
            .await
            .expect("insert");
        h.repo.get_page(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn failed_fetch_advances_last_checked_without_side_effects() {
        let h = harness(
            MockFetcher::new(&[
                ("https://a.test/", Some("page a content body")),
                ("https://b.test/", None),
                ("https://c.test/", Some("page c content body")),
            ]),
            RecordingNotifier::default(),
        )
        .await;

        let a = add_page(&h, "https://a.test/", VersioningConfig::default()).await;
        let b = add_page(&h, "https://b.test/", VersioningConfig::default()).await;
        let c = add_page(&h, "https://c.test/", VersioningConfig::default()).await;

        h.scheduler.check_due_pages().await;

        // The broken page advanced but produced nothing
        let b_after = h.repo.get_page(b.id).await.unwrap().unwrap();
        assert!(b_after.last_checked.is_some());
        assert_eq!(b_after.current_version_id, None);
        assert_eq!(h.repo.count_versions(b.id).await.unwrap(), 0);
        assert!(h.repo.change_logs_for_page(b.id, 10).await.unwrap().is_empty());

        // The healthy pages proceeded independently
        for page in [&a, &c] {
            let after = h.repo.get_page(page.id).await.unwrap().unwrap();
            assert!(after.current_version_id.is_some());
            assert_eq!(h.repo.count_versions(page.id).await.unwrap(), 1);
            assert_eq!(h.repo.change_logs_for_page(page.id, 10).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn first_version_notifies_and_logs() {
        let h = harness(
            MockFetcher::new(&[("https://a.test/", Some("hello world content"))]),
            RecordingNotifier::default(),
        )
        .await;
        let page = add_page(&h, "https://a.test/", VersioningConfig::default()).await;

        let version_id = h
            .scheduler
            .run_check(page.clone(), ChangeType::NewPage)
            .await
            .unwrap()
            .expect("stored");

        let calls = h.notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].significance_score, 1.0);
        assert_eq!(calls[0].change_percentage, 100.0);
        drop(calls);

        let logs = h.repo.change_logs_for_page(page.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].change_type, ChangeType::NewPage);
        assert!(logs[0].details.notification_sent);
        assert_eq!(logs[0].details.version_id, Some(version_id));
    }

    #[tokio::test]
    async fn low_score_version_stores_without_notifying() {
        let h = harness(
            MockFetcher::new(&[("https://a.test/", Some("a long stable body of text here"))]),
            RecordingNotifier::default(),
        )
        .await;
        // Store everything, notify only on substantial changes
        let config = VersioningConfig {
            min_change_threshold: 0.0,
            notification_threshold: 0.9,
            ..VersioningConfig::default()
        };
        let page = add_page(&h, "https://a.test/", config).await;

        // First version: score 1.0 >= 0.9, notifies
        h.scheduler
            .run_check(page.clone(), ChangeType::ContentChanged)
            .await
            .unwrap()
            .expect("first stored");

        // Small edit: stored (threshold 0) but below the notify bar
        h.fetcher
            .set("https://a.test/", Some("a long stable body of texts here"));
        let second = h
            .scheduler
            .run_check(page.clone(), ChangeType::ContentChanged)
            .await
            .unwrap()
            .expect("second stored");

        assert_eq!(h.notifier.calls.lock().unwrap().len(), 1);
        let logs = h.repo.change_logs_for_page(page.id, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        let latest = &logs[0];
        assert_eq!(latest.details.version_id, Some(second));
        assert!(!latest.details.notification_sent);
    }

    #[tokio::test]
    async fn notification_failure_keeps_version_and_change_log() {
        let h = harness(
            MockFetcher::new(&[("https://a.test/", Some("notify failure body"))]),
            RecordingNotifier {
                fail: true,
                ..RecordingNotifier::default()
            },
        )
        .await;
        let page = add_page(&h, "https://a.test/", VersioningConfig::default()).await;

        let version_id = h
            .scheduler
            .run_check(page.clone(), ChangeType::ContentChanged)
            .await
            .unwrap()
            .expect("version persists despite notifier error");

        assert!(h.repo.get_version(version_id).await.unwrap().is_some());
        let logs = h.repo.change_logs_for_page(page.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].details.notification_sent);
    }

    #[tokio::test]
    async fn pages_within_interval_are_not_rechecked() {
        let h = harness(
            MockFetcher::new(&[("https://a.test/", Some("interval body text"))]),
            RecordingNotifier::default(),
        )
        .await;
        let page = add_page(&h, "https://a.test/", VersioningConfig::default()).await;

        h.scheduler.check_due_pages().await;
        assert_eq!(h.repo.count_versions(page.id).await.unwrap(), 1);

        // Just checked with a 1440 minute interval: second tick skips it
        h.fetcher.set("https://a.test/", Some("entirely different body"));
        h.scheduler.check_due_pages().await;
        assert_eq!(h.repo.count_versions(page.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn manual_check_rejects_unknown_page() {
        let h = harness(MockFetcher::new(&[]), RecordingNotifier::default()).await;
        let err = h.scheduler.check_page_now(9999).await.unwrap_err();
        assert!(matches!(err, AppError::PageNotFound(9999)));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_waits() {
        let h = harness(MockFetcher::new(&[]), RecordingNotifier::default()).await;

        assert!(!h.scheduler.is_running());
        h.scheduler.start();
        assert!(h.scheduler.is_running());
        // Second start is a warning, not a second loop
        h.scheduler.start();
        assert!(h.scheduler.is_running());

        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running());
        // Stopping again is harmless
        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn maintenance_prunes_change_logs_and_versions() {
        let h = harness(MockFetcher::new(&[]), RecordingNotifier::default()).await;
        let page = add_page(&h, "https://a.test/", VersioningConfig::default()).await;

        // Overfill the version history directly
        for i in 0..55 {
            let text = format!("revision {i}");
            h.repo
                .insert_version(crate::models::NewPageVersion {
                    page_id: page.id,
                    timestamp: Utc::now() - chrono::Duration::hours(55 - i),
                    text_content: text.clone(),
                    html_content: None,
                    content_hash: crate::fingerprint::content_hash(&text),
                    checksum: crate::fingerprint::checksum(&text),
                    significance_score: 0.1,
                    metrics: Default::default(),
                    store_reason: "test".into(),
                    previous_version_id: None,
                })
                .await
                .unwrap();
        }

        h.scheduler.run_maintenance().await;
        assert_eq!(h.repo.count_versions(page.id).await.unwrap(), 50);
    }

    #[test]
    fn presentational_percentage_edges() {
        assert_eq!(presentational_change_percentage("", "anything"), 100.0);
        assert_eq!(presentational_change_percentage("anything", ""), 0.0);
        assert_eq!(presentational_change_percentage("same", "same"), 0.0);
        let partial = presentational_change_percentage("abcdef", "abcxyz");
        assert!(partial > 0.0 && partial < 100.0);
    }
}
