// src/app.rs
//! Shared wiring for the CLI and the HTTP surface.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{render_alert_text, AlertEvaluator, EvaluationReport};
use crate::config::AppConfig;
use crate::digest::writer::{CliModelBackend, ModelBackend};
use crate::error::ErrorCode;
use crate::ingest::{AdapterRegistry, CollectOptions, Collector, RunSummary};
use crate::notify::{Delivery, DeliveryReport};
use crate::state::{AttemptStatus, DigestStateStore, FetchStateStore};
use crate::store::{StoreCounts, Store, Trend};
use crate::trends::{ScanReport, TrendEngine};

const USER_AGENT: &str = concat!("trend-digest/", env!("CARGO_PKG_VERSION"));

pub struct App {
    pub config_path: PathBuf,
    pub cfg: AppConfig,
    pub store: Store,
    pub registry: AdapterRegistry,
    pub fetch_state: FetchStateStore,
    pub digest_state: DigestStateStore,
    pub http: Client,
    pub writer: Option<Arc<dyn ModelBackend>>,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub id: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<AttemptStatus>,
    pub last_error: Option<String>,
    pub validators: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub counts: StoreCounts,
    pub sources: Vec<SourceHealth>,
    pub latest_trends: Vec<Trend>,
    pub last_digest_at: Option<DateTime<Utc>>,
    pub outbox_pending: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct EventOptions {
    pub now: DateTime<Utc>,
    pub skip_collect: bool,
    pub deliver: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_text: Option<String>,
    pub evaluation: EvaluationReport,
    pub delivery: DeliveryReport,
}

impl App {
    /// Load the config file and wire everything from it.
    pub async fn open(config_path: &Path) -> Result<Self> {
        let cfg = AppConfig::load_from(config_path)?;
        Self::from_config(cfg, config_path).await
    }

    pub async fn from_config(cfg: AppConfig, config_path: &Path) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.digest_policy.request_timeout_secs))
            .build()
            .context("building http client")?;
        let store = Store::open(&cfg.storage.db_path).await?;
        let seeds: Vec<String> = cfg
            .keywords
            .iter()
            .map(|k| crate::ingest::normalize::normalize_keyword(k))
            .collect();
        let added = store.seed_keywords(&seeds, Utc::now()).await?;
        if added > 0 {
            tracing::info!(added, "seeded keywords");
        }

        let writer = CliModelBackend::locate(&cfg.digest_policy.writer.command)
            .map(|b| Arc::new(b) as Arc<dyn ModelBackend>);
        let delivery = Delivery::from_policy(&cfg.digest_policy.delivery, http.clone());

        Ok(Self {
            config_path: config_path.to_path_buf(),
            registry: AdapterRegistry::from_sources(&cfg.sources),
            fetch_state: FetchStateStore::new(cfg.storage.fetch_state_path.clone()),
            digest_state: DigestStateStore::new(cfg.storage.digest_state_path.clone()),
            store,
            http,
            writer,
            delivery,
            cfg,
        })
    }

    pub fn with_writer(mut self, writer: Option<Arc<dyn ModelBackend>>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn save_config(&self) -> Result<()> {
        self.cfg.save_to(&self.config_path)
    }

    /// Collector then Trend Engine, strictly in that order.
    pub async fn collect_and_score(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<(RunSummary, ScanReport)> {
        let collector = Collector::new(&self.store, &self.registry, &self.fetch_state, self.http.clone());
        let summary = collector
            .collect(
                &self.cfg.sources,
                &self.cfg.token_budget,
                CollectOptions {
                    now,
                    force,
                    dedup_lookback_days: self.cfg.digest_policy.dedup_lookback_days,
                },
            )
            .await
            .context("collecting")?;
        tracing::info!(
            inserted = summary.inserted_total,
            duplicates = summary.duplicate_total,
            skipped_by_poll = summary.skipped_by_poll,
            bytes = summary.global_bytes_used,
            "collect finished"
        );
        let scan = TrendEngine::new(&self.store, &self.cfg)
            .scan(now)
            .await
            .context("scanning trends")?;
        Ok((summary, scan))
    }

    pub async fn run_event(&self, opts: EventOptions) -> Result<EventReport> {
        if !opts.skip_collect {
            self.collect_and_score(opts.now, false).await?;
        }
        let evaluation = AlertEvaluator::new(&self.store, &self.cfg.event_thresholds, &self.cfg.thresholds)
            .evaluate(opts.now)
            .await?;
        let alert_text = (!evaluation.created.is_empty()).then(|| render_alert_text(&evaluation.created));
        let delivery = match (&alert_text, opts.deliver) {
            (Some(text), true) => self.delivery.deliver(text, "alert", opts.now).await,
            _ => DeliveryReport::not_requested(),
        };
        let failed = delivery.failed();
        Ok(EventReport {
            success: !failed,
            code: failed.then_some(ErrorCode::DeliveryFailed),
            alert_text,
            evaluation,
            delivery,
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let counts = self.store.counts().await?;
        let fetch = self.fetch_state.load();
        let sources = self
            .cfg
            .sources
            .iter()
            .map(|s| {
                let st = fetch.sources.get(&s.id);
                SourceHealth {
                    id: s.id.clone(),
                    enabled: s.enabled,
                    last_run_at: st.and_then(|f| f.last_run_at),
                    last_status: st.and_then(|f| f.last_status),
                    last_error: st.and_then(|f| f.last_error.clone()),
                    validators: st.map(|f| f.validators.len()).unwrap_or(0),
                }
            })
            .collect();
        let latest_trends = self.store.recent_trends(5).await?;
        let outbox_pending = match self.delivery.outbox() {
            Some(ob) => ob.pending()?.len(),
            None => 0,
        };
        Ok(StatusReport {
            counts,
            sources,
            latest_trends,
            last_digest_at: self.digest_state.load().last_digest_at,
            outbox_pending,
        })
    }
}
