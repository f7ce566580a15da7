// tests/collector_http.rs
//
// Collector against wiremock feeds: cross-source dedup, poll interval,
// conditional requests and the global byte ceiling.

mod common;

use chrono::Duration;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{app_with, at, config_in};
use trend_digest::config::SourceConfig;
use trend_digest::state::AttemptStatus;

fn feed(items: &[(&str, &str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link, date)| {
            format!(
                "<item><title>{title}</title><link>{link}</link><guid>{link}</guid><pubDate>{date}</pubDate></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>{body}</channel></rss>"#)
}

fn rss_source(id: &str, url: String) -> SourceConfig {
    serde_json::from_value(json!({ "id": id, "kind": "rss", "endpoints": [url] })).unwrap()
}

async fn mount_feeds(server: &MockServer) {
    let a = feed(&[
        ("Rust 2026 roadmap", "https://example.com/posts/1", "Fri, 01 May 2026 11:10:00 GMT"),
        ("Zig 0.15 released", "https://example.com/posts/2", "Fri, 01 May 2026 11:20:00 GMT"),
    ]);
    let b = feed(&[
        ("Rust 2026 roadmap (mirror)", "https://example.com/posts/1", "Fri, 01 May 2026 11:12:00 GMT"),
        ("WASM components in practice", "https://example.org/wasm", "Fri, 01 May 2026 11:30:00 GMT"),
    ]);
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .and(header("if-none-match", "\"a-v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(a)
                .insert_header("ETag", "\"a-v1\""),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(b))
        .mount(server)
        .await;
}

#[tokio::test]
async fn dedup_poll_interval_and_revalidation() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_in(dir.path());
    cfg.sources = vec![
        rss_source("feed-a", format!("{}/a.xml", server.uri())),
        rss_source("feed-b", format!("{}/b.xml", server.uri())),
    ];
    let app = app_with(dir.path(), cfg).await;

    let (first, _) = app.collect_and_score(at(12, 0), false).await.unwrap();
    assert_eq!(first.inserted_total, 3);
    assert_eq!(first.duplicate_total, 1, "same canonical url across feeds");
    assert!(first.global_bytes_used > 0);
    assert_eq!(app.store.counts().await.unwrap().items, 3);

    let (polled, _) = app
        .collect_and_score(at(12, 0) + Duration::minutes(5), false)
        .await
        .unwrap();
    assert_eq!(polled.skipped_by_poll, 2);
    assert_eq!(polled.global_bytes_used, 0);
    assert!(polled
        .per_source
        .iter()
        .all(|s| s.skipped && s.reason.as_deref() == Some("poll_interval")));

    let (forced, _) = app
        .collect_and_score(at(12, 0) + Duration::minutes(6), true)
        .await
        .unwrap();
    assert_eq!(forced.inserted_total, 0);
    let a = &forced.per_source[0];
    assert_eq!(a.reason.as_deref(), Some("not modified"));
    assert_eq!(a.bytes, 0);
    let b = &forced.per_source[1];
    assert_eq!(b.reason.as_deref(), Some("no new items"), "cursor filters old entries");

    let state = app.fetch_state.load();
    let a_state = &state.sources["feed-a"];
    assert_eq!(a_state.last_status, Some(AttemptStatus::Skipped));
    assert!(a_state.cursor.contains_key(&format!("newest:{}/a.xml", server.uri())));
}

#[tokio::test]
async fn global_budget_stops_the_run() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_in(dir.path());
    cfg.token_budget.max_fetched_bytes_per_run = 64;
    let mut a = rss_source("feed-a", format!("{}/a.xml", server.uri()));
    a.max_bytes_per_run = Some(100_000);
    cfg.sources = vec![a, rss_source("feed-b", format!("{}/b.xml", server.uri()))];
    let app = app_with(dir.path(), cfg).await;

    let (summary, _) = app.collect_and_score(at(12, 0), false).await.unwrap();
    assert_eq!(summary.per_source.len(), 1, "feed-b never runs");
    let row = &summary.per_source[0];
    assert!(!row.ok);
    assert!(row.reason.as_deref().unwrap().starts_with("global byte budget exceeded"));
    assert_eq!(summary.inserted_total, 0);

    let state = app.fetch_state.load();
    assert_eq!(
        state.sources["feed-a"].last_status,
        Some(AttemptStatus::BudgetExceeded)
    );
    assert!(!state.sources.contains_key("feed-b"));
}

#[tokio::test]
async fn repeated_not_modified_costs_nothing() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_in(dir.path());
    cfg.sources = vec![rss_source("feed-a", format!("{}/a.xml", server.uri()))];
    let app = app_with(dir.path(), cfg).await;

    let (first, _) = app.collect_and_score(at(12, 0), true).await.unwrap();
    assert!(first.global_bytes_used > 0);
    for minutes in [1, 2] {
        let (again, _) = app
            .collect_and_score(at(12, 0) + Duration::minutes(minutes), true)
            .await
            .unwrap();
        assert_eq!(again.global_bytes_used, 0);
        assert_eq!(again.per_source[0].reason.as_deref(), Some("not modified"));
    }
}

#[tokio::test]
async fn failed_endpoint_does_not_hide_earlier_items() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;
    Mock::given(method("GET"))
        .and(path("/flaky.xml"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_in(dir.path());
    let mut src = rss_source("feed-a", format!("{}/a.xml", server.uri()));
    src.endpoints.push(format!("{}/flaky.xml", server.uri()));
    cfg.sources = vec![src];
    let app = app_with(dir.path(), cfg).await;

    let (first, _) = app.collect_and_score(at(12, 0), true).await.unwrap();
    assert!(!first.per_source[0].ok);
    assert!(first.per_source[0].reason.as_deref().unwrap().contains("500"));
    assert_eq!(app.store.counts().await.unwrap().items, 0);
    let state = app.fetch_state.load();
    assert!(state.sources["feed-a"].validators.is_empty());
    assert!(state.sources["feed-a"].cursor.is_empty());

    let (second, _) = app
        .collect_and_score(at(12, 0) + Duration::minutes(1), true)
        .await
        .unwrap();
    assert!(second.per_source[0].ok);
    assert_eq!(second.inserted_total, 2);
    assert_eq!(app.store.counts().await.unwrap().items, 2);
    let state = app.fetch_state.load();
    assert!(state.sources["feed-a"]
        .validators
        .contains_key(&format!("{}/a.xml", server.uri())));
}

#[tokio::test]
async fn item_cap_leaves_the_rest_for_the_next_run() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_in(dir.path());
    let mut src = rss_source("feed-a", format!("{}/a.xml", server.uri()));
    src.max_items_per_run = Some(1);
    cfg.sources = vec![src];
    let app = app_with(dir.path(), cfg).await;

    let (first, _) = app.collect_and_score(at(12, 0), true).await.unwrap();
    assert_eq!(first.inserted_total, 1);
    assert!(app.fetch_state.load().sources["feed-a"].validators.is_empty());

    let (second, _) = app
        .collect_and_score(at(12, 0) + Duration::minutes(1), true)
        .await
        .unwrap();
    assert_eq!(second.inserted_total, 1, "older cut entry is still ahead of the cursor");
    assert_eq!(app.store.counts().await.unwrap().items, 2);

    let (third, _) = app
        .collect_and_score(at(12, 0) + Duration::minutes(2), true)
        .await
        .unwrap();
    assert_eq!(third.per_source[0].reason.as_deref(), Some("not modified"));
}
