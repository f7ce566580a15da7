// src/digest/prompt.rs
//! Structured writer prompt and parsing of the writer's reply.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::select::Selection;

/// Shape the writer must answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenDigest {
    pub headline: String,
    pub bullets: Vec<String>,
    #[serde(default)]
    pub closing: Option<String>,
}

impl WrittenDigest {
    pub fn to_text(&self) -> String {
        let mut out = self.headline.trim().to_string();
        for b in &self.bullets {
            out.push_str("\n- ");
            out.push_str(b.trim());
        }
        if let Some(c) = self.closing.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            out.push_str("\n\n");
            out.push_str(c);
        }
        out
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no JSON object in writer output")]
    NoJson,
    #[error("writer output is not valid digest JSON: {0}")]
    Invalid(String),
    #[error("writer output has an empty headline or no bullets")]
    Empty,
}

const INSTRUCTIONS: &str = "You write a short trend digest for a technical reader. \
Use only the facts in INPUT. Reply with a single JSON object and nothing else: \
{\"headline\": string, \"bullets\": [string], \"closing\": string|null}. \
One bullet per trend, in the given order, at most 30 words each. \
Keywords listed in compressedKeywords were covered in the previous digest: \
mention them in at most one short clause.";

pub fn build_prompt(sel: &Selection) -> String {
    let trends: Vec<_> = sel
        .trends
        .iter()
        .map(|t| {
            json!({
                "keyword": t.keyword,
                "level": t.level,
                "mentions": t.mention_count,
                "velocity": (t.velocity * 100.0).round() / 100.0,
                "reason": t.reason_text,
                "focus": sel.personalized_keywords.contains(&t.keyword),
                "refs": t.top_refs.iter().take(3).map(|r| json!({
                    "title": r.title,
                    "url": r.url,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    let input = json!({
        "trends": trends,
        "repeatedKeywords": sel.repeated_keywords,
        "compressRepeats": sel.compress_repeats,
        "compressedKeywords": sel.compressed_keywords,
    });
    format!("{INSTRUCTIONS}\n\nINPUT:\n{input}\n")
}

/// Accepts bare JSON, fenced JSON, or JSON surrounded by chatter.
pub fn parse_reply(raw: &str) -> Result<WrittenDigest, ParseError> {
    let start = raw.find('{').ok_or(ParseError::NoJson)?;
    let end = raw.rfind('}').ok_or(ParseError::NoJson)?;
    if end < start {
        return Err(ParseError::NoJson);
    }
    let parsed: WrittenDigest = serde_json::from_str(&raw[start..=end])
        .map_err(|e| ParseError::Invalid(e.to_string()))?;
    let bullets: Vec<String> = parsed
        .bullets
        .into_iter()
        .filter(|b| !b.trim().is_empty())
        .collect();
    if parsed.headline.trim().is_empty() || bullets.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(WrittenDigest {
        headline: parsed.headline,
        bullets,
        closing: parsed.closing,
    })
}
