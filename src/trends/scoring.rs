//! Trend scoring helpers.
//!
//! Score is the sum of four capped components:
//! volume `min(4, n/3)`, acceleration `min(4, max(0, v-1))`,
//! engagement `min(3, avg/20)` and spread `min(2, sources/2)`.

use crate::store::TrendLevel;

pub const HIGH_SCORE: f64 = 3.8;
pub const MEDIUM_SCORE: f64 = 2.3;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreInputs {
    pub current_count: i64,
    pub velocity: f64,
    pub avg_engagement: f64,
    pub distinct_sources: usize,
}

/// `current / max(previous, 1)`.
pub fn velocity(current: i64, previous: i64) -> f64 {
    current as f64 / previous.max(1) as f64
}

pub fn trend_score(i: &ScoreInputs) -> f64 {
    let volume = (i.current_count as f64 / 3.0).min(4.0);
    let accel = (i.velocity - 1.0).max(0.0).min(4.0);
    let engagement = (i.avg_engagement / 20.0).min(3.0);
    let spread = (i.distinct_sources as f64 / 2.0).min(2.0);
    volume + accel + engagement + spread
}

pub fn level_for(score: f64) -> TrendLevel {
    if score >= HIGH_SCORE {
        TrendLevel::High
    } else if score >= MEDIUM_SCORE {
        TrendLevel::Medium
    } else {
        TrendLevel::Low
    }
}

/// Short human-readable explanation stored with the trend.
pub fn reason_text(i: &ScoreInputs, previous_count: i64, window_minutes: u32) -> String {
    format!(
        "{} mentions in last {}m (prev {}), velocity x{:.2}, {} source(s), avg engagement {:.1}",
        i.current_count, window_minutes, previous_count, i.velocity, i.distinct_sources, i.avg_engagement
    )
}
