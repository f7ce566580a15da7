// src/store/mod.rs
//! Embedded SQLite store for items, keywords, trends and alerts.
//!
//! Uniqueness of items per `(source, post_id)` and of trends per
//! `(keyword, window_start, window_end)` is enforced by constraints; inserts
//! use `ON CONFLICT DO NOTHING` and report whether a row was written.

mod models;

pub use models::*;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news_items (
        id INTEGER PRIMARY KEY,
        source TEXT NOT NULL,
        community TEXT NOT NULL DEFAULT '',
        post_id TEXT NOT NULL,
        title TEXT NOT NULL,
        body_snippet TEXT NOT NULL DEFAULT '',
        comment_snippet TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        score INTEGER NOT NULL DEFAULT 0,
        comment_count INTEGER NOT NULL DEFAULT 0,
        canonical_url TEXT,
        fingerprint TEXT,
        fetched_at INTEGER NOT NULL,
        UNIQUE(source, post_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_created_at ON news_items(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_items_source_post ON news_items(source, post_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_fingerprint ON news_items(fingerprint)",
    "CREATE INDEX IF NOT EXISTS idx_items_fetched_at ON news_items(fetched_at)",
    r#"
    CREATE TABLE IF NOT EXISTS news_keywords (
        id INTEGER PRIMARY KEY,
        keyword TEXT NOT NULL UNIQUE,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS news_trends (
        id INTEGER PRIMARY KEY,
        keyword TEXT NOT NULL,
        window_start INTEGER NOT NULL,
        window_end INTEGER NOT NULL,
        mention_count INTEGER NOT NULL,
        velocity REAL NOT NULL,
        top_refs TEXT NOT NULL DEFAULT '[]',
        trend_score REAL NOT NULL,
        level TEXT NOT NULL,
        reason_text TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        UNIQUE(keyword, window_start, window_end)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_trends_window ON news_trends(keyword, window_start, window_end)",
    "CREATE INDEX IF NOT EXISTS idx_trends_created_at ON news_trends(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS news_alerts (
        id INTEGER PRIMARY KEY,
        trend_id INTEGER NOT NULL REFERENCES news_trends(id),
        keyword TEXT NOT NULL,
        level TEXT NOT NULL,
        sent_at INTEGER NOT NULL,
        payload_snapshot TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alerts_keyword_sent ON news_alerts(keyword, sent_at)",
];

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating db dir {}", parent.display()))?;
            }
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .with_context(|| format!("opening sqlite db {}", path.display()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("applying schema")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // Items
    // ------------------------------------------------------------

    /// Insert an item; `false` if `(source, post_id)` already exists.
    pub async fn insert_item(&self, item: &NewItem) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO news_items (
                source, community, post_id, title, body_snippet, comment_snippet,
                author, created_at, score, comment_count, canonical_url,
                fingerprint, fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, post_id) DO NOTHING
            "#,
        )
        .bind(&item.source)
        .bind(&item.community)
        .bind(&item.post_id)
        .bind(&item.title)
        .bind(&item.body_snippet)
        .bind(&item.comment_snippet)
        .bind(&item.author)
        .bind(item.created_at.timestamp())
        .bind(item.score)
        .bind(item.comment_count)
        .bind(&item.canonical_url)
        .bind(&item.fingerprint)
        .bind(item.fetched_at.timestamp())
        .execute(&self.pool)
        .await
        .context("inserting item")?;
        Ok(res.rows_affected() > 0)
    }

    /// Fingerprints of items fetched at or after `since`.
    pub async fn recent_fingerprints(&self, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT fingerprint FROM news_items WHERE fetched_at >= ? AND fingerprint IS NOT NULL",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("loading recent fingerprints")?;
        Ok(rows.into_iter().filter_map(|(f,)| f).collect())
    }

    /// Items with `created_at` in `[start, end)`, oldest first.
    pub async fn items_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM news_items
            WHERE created_at >= ? AND created_at < ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("loading items in window")?;
        rows.iter().map(item_from_row).collect()
    }

    // ------------------------------------------------------------
    // Keywords
    // ------------------------------------------------------------

    /// Insert seed keywords that are not yet known. Existing rows keep their
    /// enabled flag.
    pub async fn seed_keywords(&self, keywords: &[String], now: DateTime<Utc>) -> Result<usize> {
        let mut added = 0usize;
        for kw in keywords {
            if kw.is_empty() {
                continue;
            }
            let res = sqlx::query(
                "INSERT INTO news_keywords (keyword, enabled, created_at) VALUES (?, 1, ?) ON CONFLICT(keyword) DO NOTHING",
            )
            .bind(kw)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .context("seeding keyword")?;
            added += res.rows_affected() as usize;
        }
        Ok(added)
    }

    /// Insert or re-enable a keyword. `false` if it was already enabled.
    pub async fn enable_keyword(&self, keyword: &str, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO news_keywords (keyword, enabled, created_at) VALUES (?, 1, ?)
            ON CONFLICT(keyword) DO UPDATE SET enabled = 1 WHERE news_keywords.enabled = 0
            "#,
        )
        .bind(keyword)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .context("enabling keyword")?;
        Ok(res.rows_affected() > 0)
    }

    /// `false` if the keyword is unknown or already disabled.
    pub async fn disable_keyword(&self, keyword: &str) -> Result<bool> {
        let res = sqlx::query("UPDATE news_keywords SET enabled = 0 WHERE keyword = ? AND enabled = 1")
            .bind(keyword)
            .execute(&self.pool)
            .await
            .context("disabling keyword")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn enabled_keywords(&self) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            "SELECT keyword, enabled, created_at FROM news_keywords WHERE enabled = 1 ORDER BY keyword",
        )
        .fetch_all(&self.pool)
        .await
        .context("loading keywords")?;
        rows.iter()
            .map(|r| -> Result<Keyword> {
                Ok(Keyword {
                    keyword: r.try_get("keyword")?,
                    enabled: r.try_get::<i64, _>("enabled")? != 0,
                    created_at: from_ts(r.try_get("created_at")?),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------
    // Trends
    // ------------------------------------------------------------

    /// Returns the new row id, or `None` when the window tuple already exists.
    pub async fn insert_trend(&self, trend: &NewTrend) -> Result<Option<i64>> {
        let refs = serde_json::to_string(&trend.top_refs).context("serializing top refs")?;
        let res = sqlx::query(
            r#"
            INSERT INTO news_trends (
                keyword, window_start, window_end, mention_count, velocity,
                top_refs, trend_score, level, reason_text, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(keyword, window_start, window_end) DO NOTHING
            "#,
        )
        .bind(&trend.keyword)
        .bind(trend.window_start.timestamp())
        .bind(trend.window_end.timestamp())
        .bind(trend.mention_count)
        .bind(trend.velocity)
        .bind(refs)
        .bind(trend.trend_score)
        .bind(trend.level.as_str())
        .bind(&trend.reason_text)
        .bind(trend.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("inserting trend")?;
        if res.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(res.last_insert_rowid()))
        }
    }

    /// Trends created at or after `since`, newest first.
    pub async fn trends_since(&self, since: DateTime<Utc>) -> Result<Vec<Trend>> {
        let rows = sqlx::query(
            "SELECT * FROM news_trends WHERE created_at >= ? ORDER BY created_at DESC, id DESC",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("loading trends")?;
        rows.iter().map(trend_from_row).collect()
    }

    pub async fn recent_trends(&self, limit: i64) -> Result<Vec<Trend>> {
        let rows = sqlx::query("SELECT * FROM news_trends ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("loading recent trends")?;
        rows.iter().map(trend_from_row).collect()
    }

    pub async fn latest_trend_for(&self, keyword: &str) -> Result<Option<Trend>> {
        let row = sqlx::query(
            "SELECT * FROM news_trends WHERE keyword = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(keyword)
        .fetch_optional(&self.pool)
        .await
        .context("loading latest trend")?;
        row.as_ref().map(trend_from_row).transpose()
    }

    // ------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------

    pub async fn last_alert_for(&self, keyword: &str) -> Result<Option<Alert>> {
        let row = sqlx::query(
            "SELECT * FROM news_alerts WHERE keyword = ? ORDER BY sent_at DESC, id DESC LIMIT 1",
        )
        .bind(keyword)
        .fetch_optional(&self.pool)
        .await
        .context("loading last alert")?;
        row.as_ref().map(alert_from_row).transpose()
    }

    pub async fn insert_alert(&self, alert: &NewAlert) -> Result<i64> {
        let payload = serde_json::to_string(&alert.payload_snapshot).context("serializing alert")?;
        let res = sqlx::query(
            "INSERT INTO news_alerts (trend_id, keyword, level, sent_at, payload_snapshot) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(alert.trend_id)
        .bind(&alert.keyword)
        .bind(alert.level.as_str())
        .bind(alert.sent_at.timestamp())
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("inserting alert")?;
        Ok(res.last_insert_rowid())
    }

    // ------------------------------------------------------------
    // Status
    // ------------------------------------------------------------

    pub async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM news_items) AS items,
                (SELECT COUNT(*) FROM news_keywords) AS keywords,
                (SELECT COUNT(*) FROM news_keywords WHERE enabled = 1) AS enabled_keywords,
                (SELECT COUNT(*) FROM news_trends) AS trends,
                (SELECT COUNT(*) FROM news_alerts) AS alerts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("counting rows")?;
        Ok(StoreCounts {
            items: row.try_get("items")?,
            keywords: row.try_get("keywords")?,
            enabled_keywords: row.try_get("enabled_keywords")?,
            trends: row.try_get("trends")?,
            alerts: row.try_get("alerts")?,
        })
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn item_from_row(r: &SqliteRow) -> Result<Item> {
    Ok(Item {
        id: r.try_get("id")?,
        source: r.try_get("source")?,
        community: r.try_get("community")?,
        post_id: r.try_get("post_id")?,
        title: r.try_get("title")?,
        body_snippet: r.try_get("body_snippet")?,
        comment_snippet: r.try_get("comment_snippet")?,
        author: r.try_get("author")?,
        created_at: from_ts(r.try_get("created_at")?),
        score: r.try_get("score")?,
        comment_count: r.try_get("comment_count")?,
        canonical_url: r.try_get("canonical_url")?,
        fingerprint: r.try_get("fingerprint")?,
        fetched_at: from_ts(r.try_get("fetched_at")?),
    })
}

fn trend_from_row(r: &SqliteRow) -> Result<Trend> {
    let refs: String = r.try_get("top_refs")?;
    let level: String = r.try_get("level")?;
    Ok(Trend {
        id: r.try_get("id")?,
        keyword: r.try_get("keyword")?,
        window_start: from_ts(r.try_get("window_start")?),
        window_end: from_ts(r.try_get("window_end")?),
        mention_count: r.try_get("mention_count")?,
        velocity: r.try_get("velocity")?,
        top_refs: serde_json::from_str(&refs).unwrap_or_default(),
        trend_score: r.try_get("trend_score")?,
        level: TrendLevel::from_str(&level).map_err(anyhow::Error::msg)?,
        reason_text: r.try_get("reason_text")?,
        created_at: from_ts(r.try_get("created_at")?),
    })
}

fn alert_from_row(r: &SqliteRow) -> Result<Alert> {
    let payload: String = r.try_get("payload_snapshot")?;
    let level: String = r.try_get("level")?;
    Ok(Alert {
        id: r.try_get("id")?,
        trend_id: r.try_get("trend_id")?,
        keyword: r.try_get("keyword")?,
        level: TrendLevel::from_str(&level).map_err(anyhow::Error::msg)?,
        sent_at: from_ts(r.try_get("sent_at")?),
        payload_snapshot: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}
