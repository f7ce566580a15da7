// src/config/mod.rs
//! Typed view of the JSON configuration file.
//!
//! The file is the source of truth for sources, keywords and thresholds.
//! Enable/disable commands mutate it in place; keys this module does not know
//! about are carried through `extra` so a rewrite never drops them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CommandError, ConfigError};
use crate::ingest::normalize::normalize_keyword;

pub const ENV_CONFIG_PATH: &str = "TREND_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/trends.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub token_budget: TokenBudget,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub event_thresholds: EventThresholds,
    #[serde(default)]
    pub digest_policy: DigestPolicy,
    #[serde(default)]
    pub storage: StoragePaths,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Canonical keyword → interchangeable spellings.
    #[serde(default)]
    pub keyword_aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_mode() -> String {
    "digest".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenBudget {
    pub max_fetched_bytes_per_run: u64,
    pub max_items_per_source_per_run: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_fetched_bytes_per_run: 1_500_000,
            max_items_per_source_per_run: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Thresholds {
    pub window_minutes: u32,
    pub min_mentions: u32,
    pub velocity_threshold: f64,
    pub cooldown_hours: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            window_minutes: 120,
            min_mentions: 2,
            velocity_threshold: 1.1,
            cooldown_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EventThresholds {
    pub score_threshold: f64,
    pub min_mentions: u32,
    pub min_velocity: f64,
    /// How far back the evaluator looks for candidate trends.
    pub lookback_hours: u32,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            score_threshold: 3.8,
            min_mentions: 4,
            min_velocity: 1.5,
            lookback_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DigestPolicy {
    pub top_n: usize,
    pub trend_lookback_hours: u32,
    /// Previous digest state older than this is ignored for overlap.
    pub similarity_lookback_hours: u32,
    pub min_repeated_keywords: usize,
    pub max_compressed_repeats: usize,
    /// Keywords the reader follows closely; reported as personalized.
    pub focus_keywords: Vec<String>,
    pub dedup_lookback_days: u32,
    pub request_timeout_secs: u64,
    pub writer: WriterPolicy,
    pub delivery: DeliveryPolicy,
}

impl Default for DigestPolicy {
    fn default() -> Self {
        Self {
            top_n: 4,
            trend_lookback_hours: 24,
            similarity_lookback_hours: 36,
            min_repeated_keywords: 2,
            max_compressed_repeats: 2,
            focus_keywords: Vec::new(),
            dedup_lookback_days: 7,
            request_timeout_secs: 20,
            writer: WriterPolicy::default(),
            delivery: DeliveryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WriterPolicy {
    pub enabled: bool,
    /// Executable of the LLM-backed writer (resolved through `PATH`).
    pub command: String,
    pub target_model: Option<String>,
    pub timeout_secs: u64,
    pub lock_path: PathBuf,
    pub lock_timeout_secs: u64,
    pub lock_poll_millis: u64,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "llm".to_string(),
            target_model: None,
            timeout_secs: 90,
            lock_path: PathBuf::from("data/writer.lock"),
            lock_timeout_secs: 30,
            lock_poll_millis: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DeliveryPolicy {
    pub target: String,
    pub queue_fallback: bool,
    pub outbox_dir: PathBuf,
    pub api_base: String,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            target: "default".to_string(),
            queue_fallback: true,
            outbox_dir: PathBuf::from("data/outbox"),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StoragePaths {
    pub db_path: PathBuf,
    pub fetch_state_path: PathBuf,
    pub digest_state_path: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/trends.db"),
            fetch_state_path: PathBuf::from("data/fetchState.json"),
            digest_state_path: PathBuf::from("data/digestState.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Reddit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_minutes")]
    pub poll_interval_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_run: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_per_run: Option<usize>,
    /// Feed URLs (rss) or an alternate listing base URL (reddit).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    /// Subreddits / boards for community-based sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_poll_minutes() -> u32 {
    30
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg = Self::from_json(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Resolve the config path: explicit → `$TREND_CONFIG_PATH` → default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_json(s: &str) -> std::result::Result<Self, ConfigError> {
        let cfg: AppConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.thresholds.window_minutes == 0 {
            return Err(invalid("thresholds.windowMinutes", "0"));
        }
        if self.digest_policy.top_n == 0 {
            return Err(invalid("digestPolicy.topN", "0"));
        }
        if self.thresholds.velocity_threshold < 0.0 || !self.thresholds.velocity_threshold.is_finite()
        {
            return Err(invalid(
                "thresholds.velocityThreshold",
                &self.thresholds.velocity_threshold.to_string(),
            ));
        }
        if self.event_thresholds.score_threshold < 0.0 {
            return Err(invalid(
                "eventThresholds.scoreThreshold",
                &self.event_thresholds.score_threshold.to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                return Err(invalid("sources[].id", "\"\""));
            }
            if !seen.insert(s.id.as_str()) {
                return Err(ConfigError::DuplicateSource { id: s.id.clone() });
            }
        }
        Ok(())
    }

    /// Rewrite the whole file (tmp + rename).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("serializing config")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, format!("{json}\n"))
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Flip a source on or off. Returns whether the value changed.
    pub fn set_source_enabled(
        &mut self,
        id: &str,
        enabled: bool,
    ) -> std::result::Result<bool, CommandError> {
        let src = self
            .sources
            .iter_mut()
            .find(|s| s.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| CommandError::NotFound(format!("source `{id}`")))?;
        let changed = src.enabled != enabled;
        src.enabled = enabled;
        Ok(changed)
    }

    /// Add a keyword to the seed list. Returns false if it was already present.
    pub fn add_keyword(&mut self, keyword: &str) -> bool {
        let norm = normalize_keyword(keyword);
        if norm.is_empty() || self.keywords.iter().any(|k| normalize_keyword(k) == norm) {
            return false;
        }
        self.keywords.push(norm);
        true
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let norm = normalize_keyword(keyword);
        let before = self.keywords.len();
        self.keywords.retain(|k| normalize_keyword(k) != norm);
        before != self.keywords.len()
    }

    /// Keyword itself plus configured aliases, all normalized and distinct.
    pub fn alias_set(&self, keyword: &str) -> Vec<String> {
        let canon = normalize_keyword(keyword);
        let mut out = vec![canon.clone()];
        let aliases = self
            .keyword_aliases
            .iter()
            .find(|(k, _)| normalize_keyword(k) == canon)
            .map(|(_, v)| v.as_slice())
            .unwrap_or_default();
        for a in aliases {
            let n = normalize_keyword(a);
            if !n.is_empty() && !out.contains(&n) {
                out.push(n);
            }
        }
        out
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            token_budget: TokenBudget::default(),
            thresholds: Thresholds::default(),
            event_thresholds: EventThresholds::default(),
            digest_policy: DigestPolicy::default(),
            storage: StoragePaths::default(),
            keywords: Vec::new(),
            keyword_aliases: BTreeMap::new(),
            sources: Vec::new(),
            extra: Map::new(),
        }
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mode": "digest",
        "tokenBudget": { "maxFetchedBytesPerRun": 50000 },
        "thresholds": { "windowMinutes": 60, "minMentions": 3 },
        "keywords": ["Vibe  Coding", "rust"],
        "keywordAliases": { "vibe coding": ["vibecoding", "Vibe-Coding"] },
        "sources": [
            { "id": "hn", "kind": "rss", "endpoints": ["https://example.com/rss"] },
            { "id": "reddit", "kind": "reddit", "enabled": false, "communities": ["rust"] }
        ],
        "notes": { "owner": "ops" }
    }"#;

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg = AppConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.token_budget.max_fetched_bytes_per_run, 50_000);
        assert_eq!(cfg.token_budget.max_items_per_source_per_run, 40);
        assert_eq!(cfg.thresholds.window_minutes, 60);
        assert!((cfg.thresholds.velocity_threshold - 1.1).abs() < 1e-9);
        assert_eq!(cfg.digest_policy.top_n, 4);
        assert_eq!(cfg.sources[0].poll_interval_minutes, 30);
        assert!(cfg.sources[0].enabled);
        assert!(!cfg.sources[1].enabled);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let cfg = AppConfig::from_json(SAMPLE).unwrap();
        let out = serde_json::to_string(&cfg).unwrap();
        assert!(out.contains("\"notes\""));
        assert!(out.contains("\"owner\""));
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let bad = r#"{ "sources": [
            { "id": "a", "kind": "rss" }, { "id": "a", "kind": "reddit" }
        ] }"#;
        assert!(matches!(
            AppConfig::from_json(bad),
            Err(ConfigError::DuplicateSource { .. })
        ));
    }

    #[test]
    fn zero_window_is_rejected() {
        let bad = r#"{ "thresholds": { "windowMinutes": 0 } }"#;
        assert!(matches!(
            AppConfig::from_json(bad),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn alias_set_is_normalized_and_distinct() {
        let cfg = AppConfig::from_json(SAMPLE).unwrap();
        let set = cfg.alias_set("VIBE CODING");
        assert_eq!(set, vec!["vibe coding", "vibecoding", "vibe-coding"]);
        assert_eq!(cfg.alias_set("rust"), vec!["rust"]);
    }

    #[test]
    fn toggling_unknown_source_is_not_found() {
        let mut cfg = AppConfig::from_json(SAMPLE).unwrap();
        assert!(cfg.set_source_enabled("reddit", true).unwrap());
        assert!(!cfg.set_source_enabled("reddit", true).unwrap());
        assert!(matches!(
            cfg.set_source_enabled("nope", true),
            Err(CommandError::NotFound(_))
        ));
    }

    #[test]
    fn keywords_add_and_remove_by_normalized_text() {
        let mut cfg = AppConfig::from_json(SAMPLE).unwrap();
        assert!(!cfg.add_keyword("vibe coding"));
        assert!(cfg.add_keyword("  Local LLMs "));
        assert!(cfg.keywords.contains(&"local llms".to_string()));
        assert!(cfg.remove_keyword("LOCAL llms"));
        assert!(!cfg.remove_keyword("local llms"));
    }

    #[test]
    fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("trends.json");
        let mut cfg = AppConfig::from_json(SAMPLE).unwrap();
        cfg.set_source_enabled("hn", false).unwrap();
        cfg.save_to(&path).unwrap();
        let back = AppConfig::load_from(&path).unwrap();
        assert!(!back.source("hn").unwrap().enabled);
        assert_eq!(back.extra.get("notes"), cfg.extra.get("notes"));
    }
}
