use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    ChangeDetails, ChangeLogEntry, ChangeType, NewPageVersion, NewTrackedPage, PageStats,
    PageVersion, PruneStrategy, TrackedPage, VersioningConfig,
};

use super::schema::SCHEMA;

/// Lightweight projection used by the pruning routine so it does not load
/// full text content for every historical version.
#[derive(Debug, Clone)]
pub struct VersionSummary {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub significance_score: f64,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Page operations

    /// Insert a new tracked page. Duplicate URLs are an expected outcome
    /// and surface as a typed error, not a constraint violation.
    pub async fn insert_page(&self, page: NewTrackedPage) -> Result<i64> {
        let url = page.url.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pages WHERE url = ?1",
                    params![page.url],
                    |row| row.get(0),
                )?;
                if exists > 0 {
                    return Ok(None);
                }
                conn.execute(
                    r#"INSERT INTO pages (url, display_name, owner, check_interval_minutes,
                           min_change_threshold, require_significant_keywords, max_versions_kept,
                           check_structural_changes, prune_strategy, notification_threshold)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        page.url,
                        page.display_name,
                        page.owner,
                        page.check_interval_minutes,
                        page.config.min_change_threshold,
                        page.config.require_significant_keywords,
                        page.config.max_versions_kept as i64,
                        page.config.check_structural_changes,
                        page.config.prune_strategy.as_str(),
                        page.config.notification_threshold,
                    ],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;

        inserted.ok_or(AppError::DuplicateUrl(url))
    }

    pub async fn get_page(&self, id: i64) -> Result<Option<TrackedPage>> {
        let page = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"
                ))?;
                let page = stmt
                    .query_row(params![id], |row| Ok(page_from_row(row)))
                    .optional()?;
                Ok(page)
            })
            .await?;
        Ok(page)
    }

    pub async fn get_all_pages(&self) -> Result<Vec<TrackedPage>> {
        let pages = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PAGE_COLUMNS} FROM pages ORDER BY created_at DESC"
                ))?;
                let pages = stmt
                    .query_map([], |row| Ok(page_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pages)
            })
            .await?;
        Ok(pages)
    }

    pub async fn get_active_pages(&self) -> Result<Vec<TrackedPage>> {
        let pages = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PAGE_COLUMNS} FROM pages WHERE is_active = 1 ORDER BY created_at"
                ))?;
                let pages = stmt
                    .query_map([], |row| Ok(page_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pages)
            })
            .await?;
        Ok(pages)
    }

    pub async fn touch_last_checked(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE pages SET last_checked = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Advance the page pointer after a version insert. One UPDATE so the
    /// checked/changed timestamps and current version move together.
    pub async fn mark_change_detected(&self, id: i64, version_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    r#"UPDATE pages
                       SET last_checked = ?1, last_change_detected = ?1, current_version_id = ?2
                       WHERE id = ?3"#,
                    params![now, version_id, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_page_active(&self, id: i64, is_active: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE pages SET is_active = ?1 WHERE id = ?2",
                    params![is_active, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_page(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let count = conn.execute("DELETE FROM pages WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Version operations

    pub async fn insert_version(&self, version: NewPageVersion) -> Result<i64> {
        let metrics_json = serde_json::to_string(&version.metrics)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO versions (page_id, timestamp, text_content, html_content,
                           content_hash, checksum, significance_score, change_metrics,
                           store_reason, previous_version_id)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        version.page_id,
                        version.timestamp.to_rfc3339(),
                        version.text_content,
                        version.html_content,
                        version.content_hash,
                        version.checksum,
                        version.significance_score,
                        metrics_json,
                        version.store_reason,
                        version.previous_version_id,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_version(&self, id: i64) -> Result<Option<PageVersion>> {
        let version = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {VERSION_COLUMNS} FROM versions WHERE id = ?1"
                ))?;
                let version = stmt
                    .query_row(params![id], |row| Ok(version_from_row(row)))
                    .optional()?;
                Ok(version)
            })
            .await?;
        Ok(version)
    }

    pub async fn latest_version(&self, page_id: i64) -> Result<Option<PageVersion>> {
        let version = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {VERSION_COLUMNS} FROM versions
                       WHERE page_id = ?1
                       ORDER BY timestamp DESC, id DESC LIMIT 1"#
                ))?;
                let version = stmt
                    .query_row(params![page_id], |row| Ok(version_from_row(row)))
                    .optional()?;
                Ok(version)
            })
            .await?;
        Ok(version)
    }

    pub async fn latest_significant_version(
        &self,
        page_id: i64,
        min_score: f64,
    ) -> Result<Option<PageVersion>> {
        let version = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {VERSION_COLUMNS} FROM versions
                       WHERE page_id = ?1 AND significance_score >= ?2
                       ORDER BY timestamp DESC, id DESC LIMIT 1"#
                ))?;
                let version = stmt
                    .query_row(params![page_id, min_score], |row| Ok(version_from_row(row)))
                    .optional()?;
                Ok(version)
            })
            .await?;
        Ok(version)
    }

    /// The version immediately preceding the given one for the same page,
    /// ordered by timestamp with the row id as tie-break.
    pub async fn previous_version(
        &self,
        page_id: i64,
        before: &PageVersion,
    ) -> Result<Option<PageVersion>> {
        let ts = before.timestamp.to_rfc3339();
        let before_id = before.id;
        let version = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {VERSION_COLUMNS} FROM versions
                       WHERE page_id = ?1 AND (timestamp < ?2 OR (timestamp = ?2 AND id < ?3))
                       ORDER BY timestamp DESC, id DESC LIMIT 1"#
                ))?;
                let version = stmt
                    .query_row(params![page_id, ts, before_id], |row| {
                        Ok(version_from_row(row))
                    })
                    .optional()?;
                Ok(version)
            })
            .await?;
        Ok(version)
    }

    /// All versions of a page, newest first, without text content.
    pub async fn version_summaries(&self, page_id: i64) -> Result<Vec<VersionSummary>> {
        let summaries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, timestamp, significance_score FROM versions
                       WHERE page_id = ?1
                       ORDER BY timestamp DESC, id DESC"#,
                )?;
                let summaries = stmt
                    .query_map(params![page_id], |row| {
                        Ok(VersionSummary {
                            id: row.get(0)?,
                            timestamp: row
                                .get::<_, String>(1)
                                .ok()
                                .and_then(|s| parse_datetime(&s))
                                .unwrap_or_else(Utc::now),
                            significance_score: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(summaries)
            })
            .await?;
        Ok(summaries)
    }

    pub async fn count_versions(&self, page_id: i64) -> Result<usize> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM versions WHERE page_id = ?1",
                    params![page_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    pub async fn delete_versions(&self, ids: Vec<i64>) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                for id in ids {
                    deleted += tx.execute("DELETE FROM versions WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn page_stats(&self, page_id: i64, significant_threshold: f64) -> Result<PageStats> {
        let stats = self
            .conn
            .call(move |conn| {
                let (total, significant, average, bytes): (i64, i64, Option<f64>, Option<i64>) =
                    conn.query_row(
                        r#"SELECT COUNT(*),
                                  COALESCE(SUM(significance_score >= ?2), 0),
                                  AVG(significance_score),
                                  SUM(LENGTH(CAST(text_content AS BLOB)))
                           FROM versions WHERE page_id = ?1"#,
                        params![page_id, significant_threshold],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )?;
                Ok(PageStats {
                    total_versions: total as usize,
                    significant_versions: significant as usize,
                    average_score: average.unwrap_or(0.0),
                    storage_bytes: bytes.unwrap_or(0) as u64,
                })
            })
            .await?;
        Ok(stats)
    }

    // Change log operations

    pub async fn insert_change_log(
        &self,
        page_id: i64,
        owner: Option<String>,
        change_type: ChangeType,
        details: &ChangeDetails,
    ) -> Result<i64> {
        let details_json = serde_json::to_string(details)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO change_log (page_id, owner, change_type, timestamp, details)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        page_id,
                        owner,
                        change_type.as_str(),
                        Utc::now().to_rfc3339(),
                        details_json,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn change_logs_for_page(
        &self,
        page_id: i64,
        limit: usize,
    ) -> Result<Vec<ChangeLogEntry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, page_id, owner, change_type, timestamp, details
                       FROM change_log
                       WHERE page_id = ?1
                       ORDER BY timestamp DESC, id DESC LIMIT ?2"#,
                )?;
                let entries = stmt
                    .query_map(params![page_id, limit as i64], |row| {
                        Ok(change_log_from_row(row))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    pub async fn delete_change_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM change_log WHERE timestamp < ?1",
                    params![cutoff.to_rfc3339()],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }
}

const PAGE_COLUMNS: &str = "id, url, display_name, owner, check_interval_minutes, is_active, \
     created_at, last_checked, last_change_detected, current_version_id, \
     min_change_threshold, require_significant_keywords, max_versions_kept, \
     check_structural_changes, prune_strategy, notification_threshold";

const VERSION_COLUMNS: &str = "id, page_id, timestamp, text_content, html_content, content_hash, \
     checksum, significance_score, change_metrics, store_reason, previous_version_id";

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn page_from_row(row: &Row) -> TrackedPage {
    TrackedPage {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        display_name: row.get(2).unwrap(),
        owner: row.get(3).unwrap(),
        check_interval_minutes: row.get(4).unwrap(),
        is_active: row.get::<_, i64>(5).unwrap() != 0,
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        last_checked: row
            .get::<_, Option<String>>(7)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        last_change_detected: row
            .get::<_, Option<String>>(8)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        current_version_id: row.get(9).unwrap(),
        config: VersioningConfig {
            min_change_threshold: row.get(10).unwrap(),
            require_significant_keywords: row.get::<_, i64>(11).unwrap() != 0,
            max_versions_kept: row.get::<_, i64>(12).unwrap() as usize,
            check_structural_changes: row.get::<_, i64>(13).unwrap() != 0,
            prune_strategy: PruneStrategy::parse(&row.get::<_, String>(14).unwrap()),
            notification_threshold: row.get(15).unwrap(),
        },
    }
}

fn version_from_row(row: &Row) -> PageVersion {
    PageVersion {
        id: row.get(0).unwrap(),
        page_id: row.get(1).unwrap(),
        timestamp: row
            .get::<_, String>(2)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        text_content: row.get(3).unwrap(),
        html_content: row.get(4).unwrap(),
        content_hash: row.get(5).unwrap(),
        checksum: row.get(6).unwrap(),
        significance_score: row.get(7).unwrap(),
        metrics: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        store_reason: row.get(9).unwrap(),
        previous_version_id: row.get(10).unwrap(),
    }
}

fn change_log_from_row(row: &Row) -> ChangeLogEntry {
    ChangeLogEntry {
        id: row.get(0).unwrap(),
        page_id: row.get(1).unwrap(),
        owner: row.get(2).unwrap(),
        change_type: ChangeType::parse(&row.get::<_, String>(3).unwrap()),
        timestamp: row
            .get::<_, String>(4)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        details: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    }
}
