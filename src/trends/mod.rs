// src/trends/mod.rs
//! Sliding-window keyword trend detection.

pub mod engine;
pub mod scoring;

pub use engine::{align_to_minute, ScanReport, TrendEngine};
pub use scoring::{level_for, trend_score, velocity, ScoreInputs};
