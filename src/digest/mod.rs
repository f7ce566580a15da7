// src/digest/mod.rs
//! Digest orchestration: COLLECT → SCORE → SELECT → WRITE|FALLBACK →
//! DELIVER → PERSIST_STATE.

pub mod lock;
pub mod prompt;
pub mod render;
pub mod select;
pub mod writer;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::app::App;
use crate::error::ErrorCode;
use crate::ingest::RunSummary;
use crate::notify::DeliveryReport;
use crate::outcome::Outcome;
use crate::state::{DigestState, TrendSnapshot};
use crate::trends::ScanReport;
use lock::LockSettings;
use select::Selection;

#[derive(Debug, Clone, Copy)]
pub struct DigestOptions {
    pub now: DateTime<Utc>,
    pub force: bool,
    /// Replay mode: use what is already stored.
    pub skip_collect: bool,
    pub deliver: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterExecution {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub digest_text: String,
    pub digest_hash: String,
    pub keywords: Vec<String>,
    pub repeated_keywords: Vec<String>,
    pub compress_repeats: bool,
    pub personalized_keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanReport>,
    pub writer_execution: WriterExecution,
    pub delivery: DeliveryReport,
}

pub fn digest_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for b in hasher.finalize() {
        let _ = write!(&mut hex, "{:02x}", b);
    }
    hex
}

/// Model-backed writer; every problem becomes a `Fallback` with a reason.
async fn try_model_writer(app: &App, sel: &Selection) -> (Outcome<String>, Option<String>) {
    let policy = &app.cfg.digest_policy.writer;
    if !policy.enabled {
        return (Outcome::Fallback("disabled".into()), None);
    }
    if sel.trends.is_empty() {
        return (Outcome::Fallback("no_trends".into()), None);
    }
    let Some(backend) = app.writer.clone() else {
        return (
            Outcome::Fallback("backend_missing".into()),
            Some(format!("`{}` not found on PATH", policy.command)),
        );
    };

    let settings = LockSettings {
        path: policy.lock_path.clone(),
        timeout: std::time::Duration::from_secs(policy.lock_timeout_secs),
        poll: std::time::Duration::from_millis(policy.lock_poll_millis.max(1)),
    };
    let request = prompt::build_prompt(sel);
    let raw = match writer::generate_with_lease(
        backend,
        policy.target_model.clone(),
        settings,
        std::time::Duration::from_secs(policy.timeout_secs),
        request,
    )
    .await
    {
        Ok(raw) => raw,
        Err(e) => return (Outcome::Fallback(e.reason().into()), Some(e.to_string())),
    };
    match prompt::parse_reply(&raw) {
        Ok(d) => (Outcome::Ok(d.to_text()), None),
        Err(e) => (Outcome::Fallback("unparsable".into()), Some(e.to_string())),
    }
}

async fn compose(app: &App, sel: &Selection, now: DateTime<Utc>) -> (String, WriterExecution) {
    let (outcome, detail) = try_model_writer(app, sel).await;
    let backend = app.writer.as_ref().map(|b| b.name().to_string());
    match outcome {
        Outcome::Ok(text) => (
            text,
            WriterExecution {
                ok: true,
                backend,
                ..Default::default()
            },
        ),
        Outcome::Fallback(reason) | Outcome::Fail(reason) => {
            if reason != "disabled" {
                tracing::warn!(target: "digest", %reason, detail = detail.as_deref().unwrap_or(""), "writer unavailable, using template");
            }
            counter!("digest_writer_fallback_total", "reason" => reason.clone()).increment(1);
            (
                render::render_fallback(sel, now),
                WriterExecution {
                    ok: false,
                    reason: Some(reason),
                    detail,
                    backend,
                },
            )
        }
    }
}

pub async fn run_digest(app: &App, opts: DigestOptions) -> Result<DigestReport> {
    let now = opts.now;
    let policy = &app.cfg.digest_policy;
    counter!("digest_runs_total").increment(1);

    // COLLECT + SCORE
    let (collect, scan) = if opts.skip_collect {
        (None, None)
    } else {
        let (c, s) = app.collect_and_score(now, opts.force).await?;
        (Some(c), Some(s))
    };

    // SELECT
    let since = now - Duration::hours(i64::from(policy.trend_lookback_hours));
    let trends = app.store.trends_since(since).await?;
    let previous = app.digest_state.load();
    let sel = select::select(trends, &previous, policy, now);
    tracing::info!(
        target: "digest",
        keywords = ?sel.keywords,
        repeated = sel.repeated_keywords.len(),
        compress = sel.compress_repeats,
        "trends selected"
    );

    // WRITE | FALLBACK
    let (digest_text, writer_execution) = compose(app, &sel, now).await;
    let hash = digest_hash(&digest_text);

    // DELIVER
    let delivery = if opts.deliver {
        app.delivery.deliver(&digest_text, "digest", now).await
    } else {
        DeliveryReport::not_requested()
    };

    // PERSIST_STATE, whatever delivery did.
    let state = DigestState {
        updated_at: Some(now),
        last_digest_at: Some(now),
        last_digest_hash: Some(hash.clone()),
        last_digest_keywords: sel.keywords.clone(),
        last_repeated_keywords: sel.repeated_keywords.clone(),
        last_personalized_keywords: sel.personalized_keywords.clone(),
        last_digest_trends: sel
            .trends
            .iter()
            .map(|t| (t.keyword.clone(), TrendSnapshot::from(t)))
            .collect(),
    };
    app.digest_state
        .save(&state)
        .context("persisting digest state")?;

    let failed = delivery.failed();
    Ok(DigestReport {
        success: !failed,
        code: failed.then_some(ErrorCode::DeliveryFailed),
        digest_text,
        digest_hash: hash,
        keywords: sel.keywords,
        repeated_keywords: sel.repeated_keywords,
        compress_repeats: sel.compress_repeats,
        personalized_keywords: sel.personalized_keywords,
        collect,
        scan,
        writer_execution,
        delivery,
    })
}
