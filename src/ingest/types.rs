// src/ingest/types.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{SourceConfig, SourceKind};
use crate::error::BudgetExceeded;
use crate::ingest::budget::{BudgetedClient, FetchError};
use crate::ingest::providers::{reddit::RedditAdapter, rss::RssAdapter};

/// One item as an adapter sees it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub post_id: String,
    pub community: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub comments: Option<String>,
    pub author: Option<String>,
    /// Unparsed timestamp (RFC 3339, RFC 2822 or unix seconds).
    pub created_at: Option<String>,
    pub score: i64,
    pub comment_count: i64,
    pub url: Option<String>,
}

/// What an adapter hands back: items plus a patch for its cursor.
#[derive(Debug, Clone, Default)]
pub struct AdapterOutput {
    pub items: Vec<RawItem>,
    pub state_patch: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Nothing to do this round; not a failure.
    #[error("skipped: {0}")]
    Skip(String),

    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<FetchError> for AdapterError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Budget(b) => AdapterError::Budget(b),
            other => AdapterError::Failed(other.into()),
        }
    }
}

/// Inputs for one adapter invocation.
pub struct CollectRequest<'a> {
    pub source: &'a SourceConfig,
    pub prior_state: &'a Map<String, Value>,
    pub byte_budget: u64,
    pub item_cap: usize,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn collect(
        &self,
        req: CollectRequest<'_>,
        client: &mut BudgetedClient,
    ) -> Result<AdapterOutput, AdapterError>;

    fn name(&self) -> &'static str;
}

/// Adapters by source id.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One built-in adapter per configured source, chosen by `kind`.
    pub fn from_sources(sources: &[SourceConfig]) -> Self {
        let mut reg = Self::new();
        for s in sources {
            let adapter: Arc<dyn SourceAdapter> = match s.kind {
                SourceKind::Rss => Arc::new(RssAdapter),
                SourceKind::Reddit => Arc::new(RedditAdapter::default()),
            };
            reg.register(&s.id, adapter);
        }
        reg
    }

    pub fn register(&mut self, source_id: &str, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(source_id.to_string(), adapter);
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source_id).cloned()
    }
}
