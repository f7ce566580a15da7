// tests/common/mod.rs
//
// Shared fixtures: an isolated App rooted in a temp dir, and item builders.
#![allow(dead_code)]

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use trend_digest::config::AppConfig;
use trend_digest::store::NewItem;
use trend_digest::App;

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, h, m, 0).unwrap()
}

/// Config whose every path lives under `dir`. No sources, writer off,
/// delivery to a target with no credentials in the environment.
pub fn config_in(dir: &Path) -> AppConfig {
    let d = dir.display();
    let raw = json!({
        "thresholds": { "windowMinutes": 60, "minMentions": 2, "velocityThreshold": 1.1, "cooldownHours": 6 },
        "eventThresholds": { "scoreThreshold": 3.8, "minMentions": 4, "minVelocity": 1.5, "lookbackHours": 6 },
        "digestPolicy": {
            "topN": 4,
            "trendLookbackHours": 24,
            "similarityLookbackHours": 36,
            "minRepeatedKeywords": 1,
            "maxCompressedRepeats": 2,
            "writer": {
                "enabled": false,
                "lockPath": format!("{d}/writer.lock"),
                "timeoutSecs": 5,
                "lockTimeoutSecs": 2,
                "lockPollMillis": 20
            },
            "delivery": {
                "target": "itest-nobody",
                "queueFallback": true,
                "outboxDir": format!("{d}/outbox"),
                "apiBase": "http://127.0.0.1:9"
            }
        },
        "storage": {
            "dbPath": format!("{d}/trends.db"),
            "fetchStatePath": format!("{d}/fetchState.json"),
            "digestStatePath": format!("{d}/digestState.json")
        },
        "keywords": ["rust", "webassembly"],
        "keywordAliases": { "webassembly": ["wasm"] },
        "sources": []
    });
    AppConfig::from_json(&raw.to_string()).expect("fixture config is valid")
}

pub async fn app_with(dir: &Path, cfg: AppConfig) -> App {
    let path = dir.join("trends.json");
    cfg.save_to(&path).expect("write config");
    App::from_config(cfg, &path)
        .await
        .expect("app builds")
        .with_writer(None)
}

pub async fn app_in(dir: &Path) -> App {
    app_with(dir, config_in(dir)).await
}

pub fn item(source: &str, post_id: &str, title: &str, created: DateTime<Utc>, score: i64) -> NewItem {
    NewItem {
        source: source.into(),
        community: String::new(),
        post_id: post_id.into(),
        title: title.into(),
        body_snippet: String::new(),
        comment_snippet: String::new(),
        author: String::new(),
        created_at: created,
        score,
        comment_count: 0,
        canonical_url: Some(format!("https://example.com/{source}/{post_id}")),
        fingerprint: Some(format!("{source}:{post_id}")),
        fetched_at: created,
    }
}

/// Four "rust" mentions in the hour before `at(12, 0)` and one in the hour
/// before that.
pub async fn seed_rust_burst(app: &App) {
    let titles = [
        (at(11, 10), "Rust 2026 roadmap published"),
        (at(11, 25), "Why we moved our queue to Rust"),
        (at(11, 40), "Rust async closures stabilised"),
        (at(11, 55), "A Rust crate for sqlite migrations"),
    ];
    for (i, (t, title)) in titles.iter().enumerate() {
        app.store
            .insert_item(&item("hn", &format!("cur{i}"), title, *t, 10))
            .await
            .unwrap();
    }
    app.store
        .insert_item(&item("hn", "prev0", "Learning Rust in a weekend", at(10, 30), 3))
        .await
        .unwrap();
}
