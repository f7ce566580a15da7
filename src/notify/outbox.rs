// src/notify/outbox.rs
//! File-backed outbox: one JSON file per queued message.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::Notifier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: Uuid,
    pub target: String,
    /// "digest" or "alert".
    pub kind: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub delivered: usize,
    pub remaining: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, msg: &QueuedMessage) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating outbox {}", self.dir.display()))?;
        let path = self.path_for(&msg.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(msg).context("serializing queued message")?;
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(path)
    }

    pub fn enqueue(&self, target: &str, kind: &str, text: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let msg = QueuedMessage {
            id: Uuid::new_v4(),
            target: target.to_string(),
            kind: kind.to_string(),
            text: text.to_string(),
            created_at: now,
            attempts: 0,
            last_error: None,
        };
        self.write(&msg)
    }

    /// Queued messages, oldest first. Unreadable files are skipped.
    pub fn pending(&self) -> Result<Vec<QueuedMessage>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", self.dir.display())),
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<QueuedMessage>(&s).map_err(Into::into))
            {
                Ok(m) => out.push(m),
                Err(e) => {
                    tracing::warn!(target: "notify", path = %path.display(), error = %e, "skipping unreadable outbox entry")
                }
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Try each queued message once; delivered ones are removed.
    pub async fn flush(&self, notifier: &dyn Notifier) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        for mut msg in self.pending()? {
            match notifier.send(&msg.text).await {
                Ok(()) => {
                    let path = self.path_for(&msg.id);
                    fs::remove_file(&path)
                        .with_context(|| format!("removing {}", path.display()))?;
                    report.delivered += 1;
                }
                Err(e) => {
                    msg.attempts += 1;
                    msg.last_error = Some(format!("{e:#}"));
                    report.errors.push(format!("{}: {e:#}", msg.id));
                    self.write(&msg)?;
                    report.remaining += 1;
                }
            }
        }
        Ok(report)
    }
}
