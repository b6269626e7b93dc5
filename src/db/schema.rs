pub const SCHEMA: &str = r#"
-- tracked pages table
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    owner TEXT,
    check_interval_minutes INTEGER NOT NULL DEFAULT 1440,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_checked TEXT,
    last_change_detected TEXT,
    current_version_id INTEGER,
    -- versioning config, fully populated at creation time
    min_change_threshold REAL NOT NULL DEFAULT 0.05,
    require_significant_keywords INTEGER NOT NULL DEFAULT 1,
    max_versions_kept INTEGER NOT NULL DEFAULT 50,
    check_structural_changes INTEGER NOT NULL DEFAULT 1,
    prune_strategy TEXT NOT NULL DEFAULT 'significant_only',
    notification_threshold REAL NOT NULL DEFAULT 0.3
);

CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
CREATE INDEX IF NOT EXISTS idx_pages_is_active ON pages(is_active);

-- page versions table (append-only, removed only by pruning)
CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    text_content TEXT NOT NULL,
    html_content TEXT,
    content_hash TEXT NOT NULL,
    checksum TEXT NOT NULL,
    significance_score REAL NOT NULL,
    change_metrics TEXT NOT NULL,
    store_reason TEXT NOT NULL,
    previous_version_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_versions_page_timestamp ON versions(page_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_versions_page_checksum ON versions(page_id, checksum);
CREATE INDEX IF NOT EXISTS idx_versions_page_score ON versions(page_id, significance_score DESC);

-- change log table
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    owner TEXT,
    change_type TEXT NOT NULL,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_log_page_timestamp ON change_log(page_id, timestamp DESC);
"#;
