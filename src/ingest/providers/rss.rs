// src/ingest/providers/rss.rs
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::budget::{BudgetedClient, RequestOptions};
use crate::ingest::normalize::parse_timestamp;
use crate::ingest::types::{AdapterError, AdapterOutput, CollectRequest, RawItem, SourceAdapter};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    author: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// RSS 2.0 feeds listed in `endpoints`. Cursor: newest `pubDate` per feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RssAdapter;

fn cursor_key(url: &str) -> String {
    format!("newest:{url}")
}

/// Parse one feed body into raw items, newest cursor included.
pub(crate) fn parse_feed(xml: &str) -> anyhow::Result<(Option<String>, Vec<RawItem>)> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
    let community = rss.channel.title.clone();
    let items = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = it.title.unwrap_or_default();
            let post_id = it
                .guid
                .clone()
                .or_else(|| it.link.clone())
                .unwrap_or_else(|| title.clone());
            if post_id.trim().is_empty() {
                return None;
            }
            Some(RawItem {
                post_id,
                community: community.clone(),
                title,
                body: it.description,
                comments: None,
                author: it.author,
                created_at: it.pub_date,
                score: 0,
                comment_count: 0,
                url: it.link,
            })
        })
        .collect();
    Ok((community, items))
}

struct Fresh {
    items: Vec<RawItem>,
    newest: Option<DateTime<Utc>>,
    capped: bool,
}

/// Entries newer than `floor`, oldest first, at most `room` of them. The
/// cursor covers only what was kept so capped entries are picked up later.
fn take_fresh(items: Vec<RawItem>, floor: Option<DateTime<Utc>>, room: usize) -> Fresh {
    let mut dated = Vec::new();
    let mut undated = Vec::new();
    for it in items {
        let ts = it
            .created_at
            .as_deref()
            .map(|s| parse_timestamp(Some(s), DateTime::<Utc>::MIN_UTC))
            .filter(|t| *t > DateTime::<Utc>::MIN_UTC);
        match ts {
            Some(ts) if floor.is_some_and(|f| ts <= f) => {}
            Some(ts) => dated.push((ts, it)),
            // Undated entries always pass; the store dedups them.
            None => undated.push(it),
        }
    }
    dated.sort_by_key(|(ts, _)| *ts);

    let capped = dated.len() + undated.len() > room;
    let mut newest = floor;
    let mut kept = Vec::with_capacity(room.min(dated.len() + undated.len()));
    for (ts, it) in dated.into_iter().take(room) {
        newest = Some(newest.map_or(ts, |n| n.max(ts)));
        kept.push(it);
    }
    let left = room - kept.len();
    kept.extend(undated.into_iter().take(left));
    Fresh {
        items: kept,
        newest,
        capped,
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn collect(
        &self,
        req: CollectRequest<'_>,
        client: &mut BudgetedClient,
    ) -> Result<AdapterOutput, AdapterError> {
        if req.byte_budget == 0 {
            return Err(AdapterError::Skip("no byte budget left".into()));
        }
        if req.source.endpoints.is_empty() {
            return Err(AdapterError::Failed(anyhow::anyhow!(
                "rss source `{}` has no endpoints",
                req.source.id
            )));
        }

        let mut out = AdapterOutput::default();
        let mut unchanged = 0usize;
        for url in &req.source.endpoints {
            if out.items.len() >= req.item_cap {
                break;
            }
            let resp = client
                .request(url, RequestOptions { kind: "feed", cache_key: None })
                .await?;
            if resp.not_modified {
                unchanged += 1;
                continue;
            }
            let (_, items) = parse_feed(&resp.text())
                .with_context(|| format!("feed {url}"))?;
            counter!("ingest_events_total").increment(items.len() as u64);

            let key = cursor_key(url);
            let floor: Option<DateTime<Utc>> = req
                .prior_state
                .get(&key)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            let room = req.item_cap.saturating_sub(out.items.len());
            let fresh = take_fresh(items, floor, room);
            if fresh.capped {
                // A 304 next time would hide the entries cut here.
                client.invalidate(url);
            }
            out.items.extend(fresh.items);
            if let Some(n) = fresh.newest {
                out.state_patch
                    .insert(key, Value::String(n.to_rfc3339()));
            }
        }

        if unchanged == req.source.endpoints.len() {
            return Err(AdapterError::Skip("not modified".into()));
        }
        if out.items.is_empty() {
            return Err(AdapterError::Skip("no new items".into()));
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
