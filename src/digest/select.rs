// src/digest/select.rs
//! Trend selection and overlap with the previous digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::DigestPolicy;
use crate::ingest::normalize::normalize_keyword;
use crate::state::DigestState;
use crate::store::Trend;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub trends: Vec<Trend>,
    pub keywords: Vec<String>,
    /// Selected keywords that were also in the previous (fresh) digest.
    pub repeated_keywords: Vec<String>,
    pub compress_repeats: bool,
    /// Repeats rendered in the short form, at most `maxCompressedRepeats`.
    pub compressed_keywords: Vec<String>,
    pub personalized_keywords: Vec<String>,
    pub previous_state_used: bool,
}

impl Selection {
    pub fn is_compressed(&self, keyword: &str) -> bool {
        self.compressed_keywords.iter().any(|k| k == keyword)
    }
}

/// Score, then mentions, then velocity, then recency; best first.
pub fn rank(a: &Trend, b: &Trend) -> Ordering {
    b.trend_score
        .total_cmp(&a.trend_score)
        .then(b.mention_count.cmp(&a.mention_count))
        .then(b.velocity.total_cmp(&a.velocity))
        .then(b.created_at.cmp(&a.created_at))
}

pub fn select(
    trends: Vec<Trend>,
    previous: &DigestState,
    policy: &DigestPolicy,
    now: DateTime<Utc>,
) -> Selection {
    let mut best: BTreeMap<String, Trend> = BTreeMap::new();
    for t in trends {
        match best.get(&t.keyword) {
            Some(cur) if rank(&t, cur) != Ordering::Less => {}
            _ => {
                best.insert(t.keyword.clone(), t);
            }
        }
    }
    let mut picked: Vec<Trend> = best.into_values().collect();
    picked.sort_by(rank);
    picked.truncate(policy.top_n);

    let keywords: Vec<String> = picked.iter().map(|t| t.keyword.clone()).collect();

    let previous_state_used = previous.is_fresh(policy.similarity_lookback_hours, now);
    let repeated_keywords: Vec<String> = if previous_state_used {
        keywords
            .iter()
            .filter(|k| previous.last_digest_trends.contains_key(*k))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    let compress_repeats =
        !repeated_keywords.is_empty() && repeated_keywords.len() >= policy.min_repeated_keywords;
    let compressed_keywords = if compress_repeats {
        repeated_keywords
            .iter()
            .take(policy.max_compressed_repeats)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let focus: Vec<String> = policy
        .focus_keywords
        .iter()
        .map(|k| normalize_keyword(k))
        .collect();
    let personalized_keywords = keywords
        .iter()
        .filter(|k| focus.contains(k))
        .cloned()
        .collect();

    Selection {
        trends: picked,
        keywords,
        repeated_keywords,
        compress_repeats,
        compressed_keywords,
        personalized_keywords,
        previous_state_used,
    }
}
