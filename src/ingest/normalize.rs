// src/ingest/normalize.rs
//! Item normalization: text cleanup, URL canonicalization, timestamp coercion
//! and dedup fingerprints.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use url::Url;

use crate::ingest::types::RawItem;
use crate::store::NewItem;

pub const TITLE_MAX_CHARS: usize = 300;
pub const BODY_MAX_CHARS: usize = 1_000;
pub const COMMENT_MAX_CHARS: usize = 500;

/// Query keys dropped during canonicalization. Prefix entries end with `*`.
const TRACKING_PARAMS: &[&str] = &[
    "utm_*", "fbclid", "gclid", "dclid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src",
    "ref_url", "si", "spm", "yclid", "_hsenc", "_hsmi",
];

/// Decode entities, strip tags, fold quotes and whitespace, clip to `max_chars`.
pub fn clean_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (covers NBSP)
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
    }
    out
}

/// Canonical keyword form: lowercase, single spaces, trimmed.
pub fn normalize_keyword(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, every run of non-alphanumerics collapsed to one space.
pub fn match_form(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Token-boundary containment on two `match_form` strings.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let hay = format!(" {haystack} ");
    let pat = format!(" {needle} ");
    hay.contains(&pat)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.iter().any(|p| match p.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == *p,
    })
}

/// Canonical URL: http(s) only, lowercase host, no fragment, tracking
/// parameters removed, remaining query keys sorted.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host)).ok()?;
    url.set_fragment(None);
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    Some(url.to_string())
}

/// Title key used when no URL is available.
pub fn title_key(title: &str) -> String {
    match_form(title)
}

/// Canonical URL if present, else the normalized title.
pub fn fingerprint(canonical_url: Option<&str>, title: &str) -> Option<String> {
    if let Some(u) = canonical_url {
        return Some(u.to_string());
    }
    let key = title_key(title);
    if key.is_empty() {
        None
    } else {
        Some(format!("title:{key}"))
    }
}

/// Coerce RFC 3339, RFC 2822 or unix seconds/millis. Falls back to `fallback`.
pub fn parse_timestamp(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };
    let parsed = OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc2822))
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond()).single());
    if let Some(dt) = parsed {
        return dt;
    }
    if let Ok(n) = s.parse::<f64>() {
        if n.is_finite() && n > 0.0 {
            // Heuristic: anything past year ~5138 in seconds is millis.
            let secs = if n > 1e11 { n / 1_000.0 } else { n };
            if let Some(dt) = Utc.timestamp_opt(secs.trunc() as i64, 0).single() {
                return dt;
            }
        }
    }
    fallback
}

/// Turn an adapter item into a storable row.
pub fn normalize_item(
    source_id: &str,
    raw: RawItem,
    fetched_at: DateTime<Utc>,
) -> NewItem {
    let title = clean_text(&raw.title, TITLE_MAX_CHARS);
    let canonical_url = raw.url.as_deref().and_then(canonicalize_url);
    let fingerprint = fingerprint(canonical_url.as_deref(), &title);
    NewItem {
        source: source_id.to_string(),
        community: raw.community.map(|c| clean_text(&c, 120)).unwrap_or_default(),
        post_id: raw.post_id.trim().to_string(),
        body_snippet: clean_text(raw.body.as_deref().unwrap_or_default(), BODY_MAX_CHARS),
        comment_snippet: clean_text(
            raw.comments.as_deref().unwrap_or_default(),
            COMMENT_MAX_CHARS,
        ),
        author: raw.author.map(|a| clean_text(&a, 120)).unwrap_or_default(),
        created_at: parse_timestamp(raw.created_at.as_deref(), fetched_at),
        score: raw.score,
        comment_count: raw.comment_count,
        canonical_url,
        fingerprint,
        fetched_at,
        title,
    }
}
