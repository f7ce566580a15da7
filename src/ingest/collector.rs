// src/ingest/collector.rs
//! Sequential, budgeted collection across configured sources.
//!
//! Sources run one at a time in config order. Each gets its own
//! [`BudgetedClient`]; the fetch state of a source is written back right
//! after it finishes so an interrupted run resumes from there.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{SourceConfig, TokenBudget};
use crate::error::BudgetScope;
use crate::ingest::budget::BudgetedClient;
use crate::ingest::normalize::normalize_item;
use crate::ingest::types::{AdapterError, AdapterRegistry, CollectRequest};
use crate::state::{AttemptStatus, FetchStateStore};
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub now: DateTime<Utc>,
    /// Ignore poll intervals.
    pub force: bool,
    pub dedup_lookback_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRunSummary {
    pub id: String,
    pub ok: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub inserted: usize,
    pub duplicates: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub inserted_total: usize,
    pub duplicate_total: usize,
    pub skipped_by_poll: usize,
    pub global_bytes_used: u64,
    pub per_source: Vec<SourceRunSummary>,
}

pub struct Collector<'a> {
    store: &'a Store,
    registry: &'a AdapterRegistry,
    state: &'a FetchStateStore,
    http: Client,
}

impl<'a> Collector<'a> {
    pub fn new(
        store: &'a Store,
        registry: &'a AdapterRegistry,
        state: &'a FetchStateStore,
        http: Client,
    ) -> Self {
        Self {
            store,
            registry,
            state,
            http,
        }
    }

    pub async fn collect(
        &self,
        sources: &[SourceConfig],
        budget: &TokenBudget,
        opts: CollectOptions,
    ) -> Result<RunSummary> {
        super::ensure_metrics_described();
        let now = opts.now;
        let global_limit = budget.max_fetched_bytes_per_run;

        let mut file = self.state.load();
        let mut seen = self
            .store
            .recent_fingerprints(now - Duration::days(i64::from(opts.dedup_lookback_days)))
            .await?;
        let mut summary = RunSummary::default();

        let enabled: Vec<&SourceConfig> = sources.iter().filter(|s| s.enabled).collect();
        for (idx, src) in enabled.iter().copied().enumerate() {
            let mut fs = file.sources.get(&src.id).cloned().unwrap_or_default();

            if !opts.force && fs.polled_within(src.poll_interval_minutes, now) {
                tracing::debug!(target: "ingest", source = %src.id, "within poll interval, skipping");
                summary.skipped_by_poll += 1;
                summary.per_source.push(SourceRunSummary {
                    id: src.id.clone(),
                    ok: true,
                    skipped: true,
                    reason: Some("poll_interval".into()),
                    ..Default::default()
                });
                continue;
            }

            let remaining_global = global_limit.saturating_sub(summary.global_bytes_used);
            let remaining_sources = (enabled.len() - idx) as u64;
            let byte_budget = src
                .max_bytes_per_run
                .unwrap_or(remaining_global / remaining_sources.max(1));
            let item_cap = src
                .max_items_per_run
                .unwrap_or(budget.max_items_per_source_per_run);

            let mut client = BudgetedClient::new(
                self.http.clone(),
                &src.id,
                byte_budget,
                global_limit,
                summary.global_bytes_used,
                fs.validators.clone(),
            )
            .with_user_agent(src.user_agent.clone());

            let mut row = SourceRunSummary {
                id: src.id.clone(),
                ..Default::default()
            };
            let mut abort_run = false;
            // Validators are only kept when the items they vouch for were kept.
            let mut keep_validators = true;

            let result = match self.registry.get(&src.id) {
                Some(adapter) => {
                    adapter
                        .collect(
                            CollectRequest {
                                source: src,
                                prior_state: &fs.cursor,
                                byte_budget,
                                item_cap,
                            },
                            &mut client,
                        )
                        .await
                }
                None => Err(AdapterError::Failed(anyhow::anyhow!(
                    "no adapter registered for source `{}`",
                    src.id
                ))),
            };

            match result {
                Ok(out) => {
                    fs.merge_patch(out.state_patch);
                    for raw in out.items.into_iter().take(item_cap) {
                        let item = normalize_item(&src.id, raw, now);
                        if item.post_id.is_empty() {
                            continue;
                        }
                        if let Some(fp) = &item.fingerprint {
                            if seen.contains(fp) {
                                row.duplicates += 1;
                                continue;
                            }
                        }
                        let inserted = self
                            .store
                            .insert_item(&item)
                            .await
                            .with_context(|| format!("storing item from `{}`", src.id))?;
                        if inserted {
                            row.inserted += 1;
                            if let Some(fp) = item.fingerprint {
                                seen.insert(fp);
                            }
                        } else {
                            row.duplicates += 1;
                        }
                    }
                    row.ok = true;
                    fs.last_status = Some(AttemptStatus::Ok);
                    fs.last_error = None;
                }
                Err(AdapterError::Skip(reason)) => {
                    tracing::info!(target: "ingest", source = %src.id, %reason, "source skipped");
                    row.ok = true;
                    row.skipped = true;
                    row.reason = Some(reason);
                    fs.last_status = Some(AttemptStatus::Skipped);
                    fs.last_error = None;
                }
                Err(AdapterError::Budget(b)) => {
                    tracing::warn!(target: "ingest", source = %src.id, scope = %b.scope, detail = %b.detail, "byte budget exceeded");
                    counter!("collector_budget_exceeded_total", "scope" => b.scope.to_string())
                        .increment(1);
                    row.reason = Some(b.to_string());
                    fs.last_status = Some(AttemptStatus::BudgetExceeded);
                    fs.last_error = Some(b.to_string());
                    abort_run = b.scope == BudgetScope::Global;
                    keep_validators = false;
                }
                Err(AdapterError::Failed(e)) => {
                    tracing::warn!(target: "ingest", source = %src.id, error = %format!("{e:#}"), "source failed");
                    counter!("collector_source_errors_total").increment(1);
                    row.reason = Some(format!("{e:#}"));
                    fs.last_status = Some(AttemptStatus::Error);
                    fs.last_error = Some(format!("{e:#}"));
                    keep_validators = false;
                }
            }

            row.bytes = client.bytes_used();
            summary.global_bytes_used += row.bytes;
            summary.inserted_total += row.inserted;
            summary.duplicate_total += row.duplicates;
            counter!("collector_items_inserted_total").increment(row.inserted as u64);
            counter!("collector_items_duplicate_total").increment(row.duplicates as u64);

            if keep_validators {
                fs.merge_validators(client.validator_patch());
            }
            fs.drop_validators(client.invalidated());
            fs.last_run_at = Some(now);
            file.sources.insert(src.id.clone(), fs);
            self.state
                .save(&mut file, now)
                .with_context(|| format!("persisting fetch state after `{}`", src.id))?;

            tracing::info!(
                target: "ingest",
                source = %row.id,
                ok = row.ok,
                skipped = row.skipped,
                inserted = row.inserted,
                duplicates = row.duplicates,
                bytes = row.bytes,
                "source done"
            );
            summary.per_source.push(row);

            if abort_run {
                tracing::warn!(target: "ingest", "global byte budget exhausted, stopping collection");
                break;
            }
        }

        gauge!("collector_last_run_ts").set(now.timestamp() as f64);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use crate::error::BudgetExceeded;
    use crate::ingest::types::{AdapterOutput, RawItem, SourceAdapter};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn src(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.into(),
            kind: SourceKind::Rss,
            enabled: true,
            poll_interval_minutes: 30,
            max_bytes_per_run: None,
            max_items_per_run: None,
            endpoints: vec![],
            communities: vec![],
            user_agent: None,
        }
    }

    fn raw(id: &str, title: &str, url: Option<&str>) -> RawItem {
        RawItem {
            post_id: id.into(),
            title: title.into(),
            url: url.map(str::to_string),
            created_at: Some("2026-05-01T11:00:00Z".into()),
            ..Default::default()
        }
    }

    /// Returns a fixed result and records the byte budget it was offered.
    struct Fixed {
        result: Box<dyn Fn() -> Result<AdapterOutput, AdapterError> + Send + Sync>,
        budgets: Mutex<Vec<u64>>,
    }

    impl Fixed {
        fn new(f: impl Fn() -> Result<AdapterOutput, AdapterError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                result: Box::new(f),
                budgets: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        async fn collect(
            &self,
            req: CollectRequest<'_>,
            _client: &mut BudgetedClient,
        ) -> Result<AdapterOutput, AdapterError> {
            self.budgets.lock().unwrap().push(req.byte_budget);
            (self.result)()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct Env {
        _dir: tempfile::TempDir,
        store: Store,
        state: FetchStateStore,
    }

    async fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("t.db")).await.unwrap();
        let state = FetchStateStore::new(dir.path().join("fetchState.json"));
        Env { _dir: dir, store, state }
    }

    fn opts(force: bool) -> CollectOptions {
        CollectOptions {
            now: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
            force,
            dedup_lookback_days: 7,
        }
    }

    #[tokio::test]
    async fn dedups_across_sources_by_fingerprint() {
        let e = env().await;
        let mut reg = AdapterRegistry::new();
        reg.register(
            "a",
            Fixed::new(|| {
                Ok(AdapterOutput {
                    items: vec![
                        raw("1", "Vibe coding is here", Some("https://x.com/p?utm_source=a")),
                        raw("2", "Another story", None),
                    ],
                    ..Default::default()
                })
            }),
        );
        reg.register(
            "b",
            Fixed::new(|| {
                Ok(AdapterOutput {
                    items: vec![
                        raw("9", "Different title", Some("https://www.x.com/p")),
                        raw("10", "ANOTHER story!", None),
                    ],
                    ..Default::default()
                })
            }),
        );
        let sources = vec![src("a"), src("b")];
        let c = Collector::new(&e.store, &reg, &e.state, Client::new());
        let s = c.collect(&sources, &TokenBudget::default(), opts(false)).await.unwrap();
        assert_eq!(s.inserted_total, 2);
        assert_eq!(s.duplicate_total, 2);
        assert_eq!(s.per_source[1].duplicates, 2);
    }

    #[tokio::test]
    async fn poll_interval_skips_unless_forced() {
        let e = env().await;
        let mut reg = AdapterRegistry::new();
        reg.register("a", Fixed::new(|| Err(AdapterError::Skip("nothing new".into()))));
        let sources = vec![src("a")];
        let c = Collector::new(&e.store, &reg, &e.state, Client::new());

        let first = c.collect(&sources, &TokenBudget::default(), opts(false)).await.unwrap();
        assert_eq!(first.skipped_by_poll, 0);
        assert!(first.per_source[0].skipped);
        assert_eq!(first.per_source[0].reason.as_deref(), Some("nothing new"));

        let second = c.collect(&sources, &TokenBudget::default(), opts(false)).await.unwrap();
        assert_eq!(second.skipped_by_poll, 1);

        let forced = c.collect(&sources, &TokenBudget::default(), opts(true)).await.unwrap();
        assert_eq!(forced.skipped_by_poll, 0);
    }

    #[tokio::test]
    async fn global_budget_stops_remaining_sources() {
        let e = env().await;
        let mut reg = AdapterRegistry::new();
        reg.register(
            "a",
            Fixed::new(|| Err(BudgetExceeded::source("a", "too big").into())),
        );
        reg.register(
            "b",
            Fixed::new(|| Err(BudgetExceeded::global("b", "spent").into())),
        );
        let c_adapter = Fixed::new(|| Ok(AdapterOutput::default()));
        reg.register("c", c_adapter.clone());
        let sources = vec![src("a"), src("b"), src("c")];
        let c = Collector::new(&e.store, &reg, &e.state, Client::new());
        let s = c.collect(&sources, &TokenBudget::default(), opts(false)).await.unwrap();

        let ids: Vec<_> = s.per_source.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!s.per_source[0].ok);
        assert!(c_adapter.budgets.lock().unwrap().is_empty());

        let st = e.state.load();
        assert_eq!(st.sources["b"].last_status, Some(AttemptStatus::BudgetExceeded));
        assert!(!st.sources.contains_key("c"));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_do_not_stop_the_run() {
        let e = env().await;
        let mut reg = AdapterRegistry::new();
        reg.register("a", Fixed::new(|| Err(AdapterError::Failed(anyhow::anyhow!("boom")))));
        reg.register(
            "b",
            Fixed::new(|| {
                Ok(AdapterOutput {
                    items: vec![raw("1", "hello", None)],
                    ..Default::default()
                })
            }),
        );
        let sources = vec![src("a"), src("b"), src("unregistered")];
        let c = Collector::new(&e.store, &reg, &e.state, Client::new());
        let s = c.collect(&sources, &TokenBudget::default(), opts(false)).await.unwrap();
        assert_eq!(s.per_source.len(), 3);
        assert!(!s.per_source[0].ok);
        assert!(s.per_source[0].reason.as_deref().unwrap().contains("boom"));
        assert!(s.per_source[1].ok);
        assert_eq!(s.inserted_total, 1);
        assert!(!s.per_source[2].ok);
        assert_eq!(e.state.load().sources["a"].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn byte_share_splits_remaining_budget() {
        let e = env().await;
        let mut reg = AdapterRegistry::new();
        let a = Fixed::new(|| Ok(AdapterOutput::default()));
        let b = Fixed::new(|| Ok(AdapterOutput::default()));
        reg.register("a", a.clone());
        reg.register("b", b.clone());
        let mut sb = src("b");
        sb.max_bytes_per_run = Some(123);
        let mut disabled = src("off");
        disabled.enabled = false;
        let budget = TokenBudget {
            max_fetched_bytes_per_run: 1_000,
            max_items_per_source_per_run: 10,
        };
        let c = Collector::new(&e.store, &reg, &e.state, Client::new());
        c.collect(&[src("a"), sb, disabled], &budget, opts(false)).await.unwrap();
        assert_eq!(*a.budgets.lock().unwrap(), vec![500]);
        assert_eq!(*b.budgets.lock().unwrap(), vec![123]);
    }
}
