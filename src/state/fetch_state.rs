// src/state/fetch_state.rs
//! Per-source fetch cursor persisted to `fetchState.json`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{read_json_or_default, write_json_atomic};

pub const FETCH_STATE_VERSION: u32 = 1;

/// Cache validators remembered for one request key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validator {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Outcome label of the most recent attempt, for the status report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Ok,
    Skipped,
    Error,
    BudgetExceeded,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchState {
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_status: Option<AttemptStatus>,
    #[serde(default)]
    pub validators: BTreeMap<String, Validator>,
    /// Adapter-owned cursor; merged with each returned state patch.
    #[serde(default)]
    pub cursor: Map<String, Value>,
}

impl FetchState {
    /// True when the source was polled less than `interval_minutes` ago.
    pub fn polled_within(&self, interval_minutes: u32, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            Some(last) => now - last < Duration::minutes(i64::from(interval_minutes)),
            None => false,
        }
    }

    /// Shallow merge of an adapter state patch; `null` values delete keys.
    pub fn merge_patch(&mut self, patch: Map<String, Value>) {
        for (k, v) in patch {
            if v.is_null() {
                self.cursor.remove(&k);
            } else {
                self.cursor.insert(k, v);
            }
        }
    }

    /// Fold in validators observed this run without dropping older ones.
    pub fn merge_validators(&mut self, latest: &BTreeMap<String, Validator>) {
        for (k, v) in latest {
            self.validators.insert(k.clone(), v.clone());
        }
    }

    pub fn drop_validators<'k>(&mut self, keys: impl IntoIterator<Item = &'k String>) {
        for k in keys {
            self.validators.remove(k);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchStateFile {
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sources: BTreeMap<String, FetchState>,
}

impl Default for FetchStateFile {
    fn default() -> Self {
        Self {
            version: FETCH_STATE_VERSION,
            updated_at: None,
            sources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchStateStore {
    path: PathBuf,
}

impl FetchStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files start from an empty state.
    pub fn load(&self) -> FetchStateFile {
        read_json_or_default(&self.path)
    }

    pub fn save(&self, file: &mut FetchStateFile, now: DateTime<Utc>) -> Result<()> {
        file.version = FETCH_STATE_VERSION;
        file.updated_at = Some(now);
        write_json_atomic(&self.path, file)
    }
}
