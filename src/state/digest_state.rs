// src/state/digest_state.rs
//! Singleton memory of the previous digest. Only biases the next run's
//! selection and phrasing.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{read_json_or_default, write_json_atomic};
use crate::store::{Trend, TrendLevel};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendSnapshot {
    pub mention_count: i64,
    pub velocity: f64,
    pub trend_score: f64,
    pub level: TrendLevel,
    pub window_end: DateTime<Utc>,
}

impl From<&Trend> for TrendSnapshot {
    fn from(t: &Trend) -> Self {
        Self {
            mention_count: t.mention_count,
            velocity: t.velocity,
            trend_score: t.trend_score,
            level: t.level,
            window_end: t.window_end,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DigestState {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_digest_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_digest_hash: Option<String>,
    #[serde(default)]
    pub last_digest_keywords: Vec<String>,
    #[serde(default)]
    pub last_repeated_keywords: Vec<String>,
    #[serde(default)]
    pub last_personalized_keywords: Vec<String>,
    #[serde(default)]
    pub last_digest_trends: BTreeMap<String, TrendSnapshot>,
}

impl DigestState {
    /// The state is only honored while younger than `lookback_hours`.
    pub fn is_fresh(&self, lookback_hours: u32, now: DateTime<Utc>) -> bool {
        match self.updated_at {
            Some(ts) => now - ts <= Duration::hours(i64::from(lookback_hours)),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DigestStateStore {
    path: PathBuf,
}

impl DigestStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> DigestState {
        read_json_or_default(&self.path)
    }

    pub fn save(&self, state: &DigestState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}
