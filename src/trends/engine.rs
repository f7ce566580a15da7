// src/trends/engine.rs
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::scoring::{level_for, reason_text, trend_score, velocity, ScoreInputs};
use crate::config::AppConfig;
use crate::ingest::normalize::{contains_phrase, match_form};
use crate::store::{Item, NewTrend, Store, TopRef, Trend};

pub const MAX_TOP_REFS: usize = 5;

/// Truncate to the whole minute so re-runs address the same window tuple.
pub fn align_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp().div_euclid(60) * 60;
    DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub keywords_evaluated: usize,
    /// Qualifying trends whose window tuple was already stored.
    pub already_recorded: usize,
    pub created: Vec<Trend>,
}

pub struct TrendEngine<'a> {
    store: &'a Store,
    cfg: &'a AppConfig,
}

struct Scanned<'i> {
    item: &'i Item,
    text: String,
}

impl<'a> TrendEngine<'a> {
    pub fn new(store: &'a Store, cfg: &'a AppConfig) -> Self {
        Self { store, cfg }
    }

    /// Count keyword mentions over `[now-2w, now-w)` and `[now-w, now)` and
    /// persist every keyword that clears the thresholds.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let th = &self.cfg.thresholds;
        let window = Duration::minutes(i64::from(th.window_minutes));
        let end = align_to_minute(now);
        let start = end - window;
        let prev_start = start - window;

        let items = self.store.items_between(prev_start, end).await?;
        let scanned: Vec<Scanned<'_>> = items
            .iter()
            .map(|it| Scanned {
                item: it,
                text: match_form(&format!(
                    "{} {} {}",
                    it.title, it.body_snippet, it.comment_snippet
                )),
            })
            .collect();

        let keywords = self.store.enabled_keywords().await?;
        let mut report = ScanReport {
            window_start: Some(start),
            window_end: Some(end),
            keywords_evaluated: keywords.len(),
            ..Default::default()
        };

        for kw in keywords {
            let aliases: Vec<String> = self
                .cfg
                .alias_set(&kw.keyword)
                .iter()
                .map(|a| match_form(a))
                .filter(|a| !a.is_empty())
                .collect();
            let hits = |s: &Scanned<'_>| aliases.iter().any(|a| contains_phrase(&s.text, a));

            let mut current: Vec<&Item> = Vec::new();
            let mut previous = 0i64;
            for s in scanned.iter().filter(|s| hits(s)) {
                if s.item.created_at >= start {
                    current.push(s.item);
                } else {
                    previous += 1;
                }
            }

            let cur = current.len() as i64;
            if cur == 0 || cur < i64::from(th.min_mentions) {
                continue;
            }
            let vel = velocity(cur, previous);
            if vel < th.velocity_threshold {
                continue;
            }

            let avg_engagement =
                current.iter().map(|i| i.engagement() as f64).sum::<f64>() / cur as f64;
            let distinct_sources = current
                .iter()
                .map(|i| i.source.as_str())
                .collect::<HashSet<_>>()
                .len();
            let inputs = ScoreInputs {
                current_count: cur,
                velocity: vel,
                avg_engagement,
                distinct_sources,
            };
            let score = trend_score(&inputs);

            current.sort_by(|a, b| {
                b.engagement()
                    .cmp(&a.engagement())
                    .then(b.created_at.cmp(&a.created_at))
                    .then(a.id.cmp(&b.id))
            });
            let top_refs = current
                .iter()
                .take(MAX_TOP_REFS)
                .map(|i| TopRef {
                    item_id: i.id,
                    source: i.source.clone(),
                    title: i.title.clone(),
                    url: i.canonical_url.clone(),
                    engagement: i.engagement(),
                })
                .collect();

            let new = NewTrend {
                keyword: kw.keyword.clone(),
                window_start: start,
                window_end: end,
                mention_count: cur,
                velocity: vel,
                top_refs,
                trend_score: score,
                level: level_for(score),
                reason_text: reason_text(&inputs, previous, th.window_minutes),
                created_at: now,
            };
            match self.store.insert_trend(&new).await? {
                Some(id) => {
                    tracing::info!(
                        target: "trends",
                        keyword = %new.keyword,
                        mentions = cur,
                        velocity = vel,
                        score = score,
                        level = %new.level,
                        "trend recorded"
                    );
                    counter!("trends_persisted_total").increment(1);
                    report.created.push(new.into_trend(id));
                }
                None => report.already_recorded += 1,
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewItem;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, h, m, 0).unwrap()
    }

    fn item(source: &str, id: &str, title: &str, created: DateTime<Utc>, score: i64) -> NewItem {
        NewItem {
            source: source.into(),
            community: String::new(),
            post_id: id.into(),
            title: title.into(),
            body_snippet: String::new(),
            comment_snippet: String::new(),
            author: String::new(),
            created_at: created,
            score,
            comment_count: 0,
            canonical_url: None,
            fingerprint: None,
            fetched_at: created,
        }
    }

    #[test]
    fn alignment_drops_seconds() {
        let t = Utc.with_ymd_and_hms(2026, 5, 1, 12, 34, 56).unwrap();
        assert_eq!(align_to_minute(t), at(12, 34));
    }

    #[tokio::test]
    async fn alias_mentions_count_toward_canonical_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("t.db")).await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.keyword_aliases
            .insert("local llm".into(), vec!["ollama".into()]);
        store.seed_keywords(&["local llm".into()], at(0, 0)).await.unwrap();

        store.insert_item(&item("a", "1", "Local LLM on a laptop", at(11, 0), 10)).await.unwrap();
        store.insert_item(&item("b", "2", "Ollama 1.0 released", at(11, 30), 40)).await.unwrap();
        // "llms" is a different token and must not match.
        store.insert_item(&item("b", "3", "Local LLMs everywhere", at(11, 40), 0)).await.unwrap();

        let report = TrendEngine::new(&store, &cfg).scan(at(12, 0)).await.unwrap();
        assert_eq!(report.created.len(), 1);
        let t = &report.created[0];
        assert_eq!(t.keyword, "local llm");
        assert_eq!(t.mention_count, 2);
        assert_eq!(t.top_refs[0].source, "b");
        assert_eq!(t.top_refs[0].engagement, 40);
    }

    #[tokio::test]
    async fn quiet_current_window_never_trends() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("t.db")).await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.thresholds.window_minutes = 60;
        cfg.thresholds.min_mentions = 0;
        cfg.thresholds.velocity_threshold = 0.0;
        store.seed_keywords(&["rust".into()], at(0, 0)).await.unwrap();
        for (i, m) in [5, 20, 40].into_iter().enumerate() {
            let id = i.to_string();
            store.insert_item(&item("a", &id, "Rust news", at(10, m), 5)).await.unwrap();
        }

        let report = TrendEngine::new(&store, &cfg).scan(at(12, 0)).await.unwrap();
        assert_eq!(report.keywords_evaluated, 1);
        assert!(report.created.is_empty());
        assert!(store.latest_trend_for("rust").await.unwrap().is_none());
    }
}
