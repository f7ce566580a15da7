// src/ingest/providers/reddit.rs
use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::budget::{BudgetedClient, RequestOptions};
use crate::ingest::types::{AdapterError, AdapterOutput, CollectRequest, RawItem, SourceAdapter};

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const MAX_LISTING_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_self: bool,
}

/// `/r/{community}/new.json` listings. The first endpoint, when set, replaces
/// the public base URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedditAdapter;

fn cursor_key(community: &str) -> String {
    format!("lastSeen:{}", community.to_ascii_lowercase())
}

fn to_raw(p: Post, base: &str) -> RawItem {
    let permalink = p.permalink.map(|pl| format!("{base}{pl}"));
    let url = if p.is_self { permalink } else { p.url.or(permalink) };
    RawItem {
        post_id: p.id,
        community: p.subreddit,
        title: p.title,
        body: Some(p.selftext).filter(|s| !s.is_empty()),
        comments: None,
        author: p.author,
        created_at: Some(format!("{}", p.created_utc.trunc() as i64)),
        score: p.score,
        comment_count: p.num_comments,
        url,
    }
}

/// Posts newer than `last_seen`, oldest first and at most `room` of them.
/// The returned cursor only covers the kept posts, so anything cut by the
/// cap is still newer than it on the next run. The flag reports such a cut.
fn take_fresh(children: Vec<Child>, last_seen: f64, room: usize) -> (Vec<Post>, f64, bool) {
    let mut fresh: Vec<Post> = children
        .into_iter()
        .map(|c| c.data)
        .filter(|p| p.created_utc > last_seen)
        .collect();
    fresh.sort_by(|a, b| a.created_utc.total_cmp(&b.created_utc));
    let capped = fresh.len() > room;
    fresh.truncate(room);
    let newest = fresh.iter().map(|p| p.created_utc).fold(last_seen, f64::max);
    (fresh, newest, capped)
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    async fn collect(
        &self,
        req: CollectRequest<'_>,
        client: &mut BudgetedClient,
    ) -> Result<AdapterOutput, AdapterError> {
        if req.byte_budget == 0 {
            return Err(AdapterError::Skip("no byte budget left".into()));
        }
        if req.source.communities.is_empty() {
            return Err(AdapterError::Skip("no communities configured".into()));
        }
        let base = req
            .source
            .endpoints
            .first()
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let limit = req.item_cap.clamp(1, MAX_LISTING_LIMIT);

        let mut out = AdapterOutput::default();
        for community in &req.source.communities {
            if out.items.len() >= req.item_cap {
                break;
            }
            let url = format!("{base}/r/{community}/new.json?limit={limit}&raw_json=1");
            let key = format!("reddit:{}", community.to_ascii_lowercase());
            let resp = client
                .request(&url, RequestOptions { kind: "listing", cache_key: Some(&key) })
                .await?;
            if resp.not_modified {
                continue;
            }
            let listing: Listing = serde_json::from_slice(&resp.data)
                .with_context(|| format!("decoding listing for r/{community}"))?;

            let ckey = cursor_key(community);
            let last_seen = req.prior_state.get(&ckey).and_then(Value::as_f64).unwrap_or(0.0);
            let room = req.item_cap.saturating_sub(out.items.len());
            let (kept, newest, capped) = take_fresh(listing.data.children, last_seen, room);
            if capped {
                // A 304 next time would hide the posts cut here.
                client.invalidate(&key);
            }
            counter!("ingest_events_total").increment(kept.len() as u64);
            out.items.extend(kept.into_iter().map(|p| to_raw(p, &base)));
            if newest > last_seen {
                if let Some(n) = serde_json::Number::from_f64(newest) {
                    out.state_patch.insert(ckey, Value::Number(n));
                }
            }
        }

        if out.items.is_empty() {
            return Err(AdapterError::Skip("no new posts".into()));
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}
