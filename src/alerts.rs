// src/alerts.rs
//! Cooldown-gated alerts for high-intensity trends.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

use crate::config::{EventThresholds, Thresholds};
use crate::store::{Alert, NewAlert, Store, Trend};

/// Minimum spacing between two alerts for the same keyword.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    window: Duration,
}

impl Cooldown {
    pub fn hours(h: u32) -> Self {
        Self {
            window: Duration::hours(i64::from(h)),
        }
    }

    /// True when no prior alert exists or the last one is old enough.
    pub fn allows(&self, last_sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_sent_at {
            None => true,
            Some(last) => now - last >= self.window,
        }
    }
}

pub fn passes_event_thresholds(t: &Trend, th: &EventThresholds) -> bool {
    t.mention_count >= i64::from(th.min_mentions)
        && t.velocity >= th.min_velocity
        && t.trend_score >= th.score_threshold
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub candidates: usize,
    pub suppressed: Vec<String>,
    pub created: Vec<Alert>,
}

pub struct AlertEvaluator<'a> {
    store: &'a Store,
    event: &'a EventThresholds,
    cooldown: Cooldown,
}

impl<'a> AlertEvaluator<'a> {
    pub fn new(store: &'a Store, event: &'a EventThresholds, thresholds: &Thresholds) -> Self {
        Self {
            store,
            event,
            cooldown: Cooldown::hours(thresholds.cooldown_hours),
        }
    }

    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let since = now - Duration::hours(i64::from(self.event.lookback_hours));
        let mut candidates: Vec<Trend> = self
            .store
            .trends_since(since)
            .await?
            .into_iter()
            .filter(|t| passes_event_thresholds(t, self.event))
            .collect();
        candidates.sort_by(|a, b| {
            b.trend_score
                .total_cmp(&a.trend_score)
                .then(b.created_at.cmp(&a.created_at))
        });

        let mut report = EvaluationReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let mut handled: HashSet<String> = HashSet::new();

        for cand in candidates {
            if !handled.insert(cand.keyword.clone()) {
                continue;
            }
            let last = self.store.last_alert_for(&cand.keyword).await?;
            if !self.cooldown.allows(last.as_ref().map(|a| a.sent_at), now) {
                tracing::debug!(target: "alerts", keyword = %cand.keyword, "suppressed by cooldown");
                counter!("alerts_suppressed_total").increment(1);
                report.suppressed.push(cand.keyword.clone());
                continue;
            }

            // The alert points at the keyword's newest trend row.
            let trend = self
                .store
                .latest_trend_for(&cand.keyword)
                .await?
                .unwrap_or(cand);
            let new = NewAlert {
                trend_id: trend.id,
                keyword: trend.keyword.clone(),
                level: trend.level,
                sent_at: now,
                payload_snapshot: snapshot(&trend),
            };
            let id = self.store.insert_alert(&new).await?;
            tracing::info!(target: "alerts", keyword = %new.keyword, level = %new.level, trend_id = new.trend_id, "alert created");
            counter!("alerts_created_total").increment(1);
            report.created.push(Alert {
                id,
                trend_id: new.trend_id,
                keyword: new.keyword,
                level: new.level,
                sent_at: new.sent_at,
                payload_snapshot: new.payload_snapshot,
            });
        }
        Ok(report)
    }
}

fn snapshot(t: &Trend) -> serde_json::Value {
    json!({
        "keyword": t.keyword,
        "level": t.level,
        "trendScore": t.trend_score,
        "mentionCount": t.mention_count,
        "velocity": t.velocity,
        "windowStart": t.window_start,
        "windowEnd": t.window_end,
        "reasonText": t.reason_text,
        "topRefs": t.top_refs,
    })
}

/// Plain-text message for a batch of alerts.
pub fn render_alert_text(alerts: &[Alert]) -> String {
    let mut out = String::from("Trend alert");
    for a in alerts {
        let p = &a.payload_snapshot;
        let mentions = p.get("mentionCount").and_then(|v| v.as_i64()).unwrap_or_default();
        let velocity = p.get("velocity").and_then(|v| v.as_f64()).unwrap_or_default();
        out.push_str(&format!(
            "\n- {} [{}]: {} mentions, x{:.1} velocity",
            a.keyword, a.level, mentions, velocity
        ));
        if let Some(url) = p
            .get("topRefs")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("url"))
            .and_then(|u| u.as_str())
        {
            out.push_str(&format!("\n  {url}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewTrend, TrendLevel};
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn cooldown_boundary() {
        let cd = Cooldown::hours(6);
        assert!(cd.allows(None, at(12)));
        assert!(!cd.allows(Some(at(7)), at(12)));
        assert!(cd.allows(Some(at(6)), at(12)));
    }

    fn trend(keyword: &str, score: f64, end: DateTime<Utc>) -> NewTrend {
        NewTrend {
            keyword: keyword.into(),
            window_start: end - Duration::hours(2),
            window_end: end,
            mention_count: 6,
            velocity: 3.0,
            top_refs: vec![],
            trend_score: score,
            level: TrendLevel::High,
            reason_text: String::new(),
            created_at: end,
        }
    }

    #[tokio::test]
    async fn second_evaluation_inside_cooldown_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("t.db")).await.unwrap();
        store.insert_trend(&trend("rust", 5.0, at(10))).await.unwrap();
        store.insert_trend(&trend("weak", 1.0, at(10))).await.unwrap();
        let latest = store.insert_trend(&trend("rust", 4.0, at(11))).await.unwrap();

        let ev = EventThresholds::default();
        let th = Thresholds::default();
        let evaluator = AlertEvaluator::new(&store, &ev, &th);

        let first = evaluator.evaluate(at(12)).await.unwrap();
        assert_eq!(first.candidates, 2);
        assert_eq!(first.created.len(), 1);
        assert_eq!(first.created[0].keyword, "rust");
        assert_eq!(Some(first.created[0].trend_id), latest);

        let second = evaluator.evaluate(at(13)).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.suppressed, vec!["rust".to_string()]);
    }
}
