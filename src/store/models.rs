// src/store/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized item ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub source: String,
    pub community: String,
    pub post_id: String,
    pub title: String,
    pub body_snippet: String,
    pub comment_snippet: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub comment_count: i64,
    pub canonical_url: Option<String>,
    /// Dedup key (canonical URL or normalized title); not unique in storage.
    pub fingerprint: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub source: String,
    pub community: String,
    pub post_id: String,
    pub title: String,
    pub body_snippet: String,
    pub comment_snippet: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub comment_count: i64,
    pub canonical_url: Option<String>,
    pub fingerprint: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl Item {
    pub fn engagement(&self) -> i64 {
        self.score.max(0) + self.comment_count.max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub keyword: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLevel {
    Low,
    Medium,
    High,
}

impl TrendLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLevel::Low => "low",
            TrendLevel::Medium => "medium",
            TrendLevel::High => "high",
        }
    }
}

impl fmt::Display for TrendLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TrendLevel::Low),
            "medium" => Ok(TrendLevel::Medium),
            "high" => Ok(TrendLevel::High),
            other => Err(format!("unknown trend level `{other}`")),
        }
    }
}

/// Reference to a contributing item, stored inline with the trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopRef {
    pub item_id: i64,
    pub source: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub engagement: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrend {
    pub keyword: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mention_count: i64,
    pub velocity: f64,
    pub top_refs: Vec<TopRef>,
    pub trend_score: f64,
    pub level: TrendLevel,
    pub reason_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub id: i64,
    pub keyword: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mention_count: i64,
    pub velocity: f64,
    pub top_refs: Vec<TopRef>,
    pub trend_score: f64,
    pub level: TrendLevel,
    pub reason_text: String,
    pub created_at: DateTime<Utc>,
}

impl NewTrend {
    pub fn into_trend(self, id: i64) -> Trend {
        Trend {
            id,
            keyword: self.keyword,
            window_start: self.window_start,
            window_end: self.window_end,
            mention_count: self.mention_count,
            velocity: self.velocity,
            top_refs: self.top_refs,
            trend_score: self.trend_score,
            level: self.level,
            reason_text: self.reason_text,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub trend_id: i64,
    pub keyword: String,
    pub level: TrendLevel,
    pub sent_at: DateTime<Utc>,
    pub payload_snapshot: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub trend_id: i64,
    pub keyword: String,
    pub level: TrendLevel,
    pub sent_at: DateTime<Utc>,
    pub payload_snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub items: i64,
    pub keywords: i64,
    pub enabled_keywords: i64,
    pub trends: i64,
    pub alerts: i64,
}
