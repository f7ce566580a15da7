// src/digest/render.rs
//! Deterministic local digest template. Used whenever the writer is not.

use chrono::{DateTime, Utc};

use super::select::Selection;

pub fn render_fallback(sel: &Selection, now: DateTime<Utc>) -> String {
    let mut out = format!("Trend digest {}", now.format("%Y-%m-%d %H:%M UTC"));
    if sel.trends.is_empty() {
        out.push_str("\nNo notable trends right now.");
        return out;
    }

    let mut n = 0usize;
    for t in &sel.trends {
        if sel.is_compressed(&t.keyword) {
            continue;
        }
        n += 1;
        let focus = if sel.personalized_keywords.contains(&t.keyword) {
            " (focus)"
        } else {
            ""
        };
        let again = if sel.repeated_keywords.contains(&t.keyword) {
            ", again"
        } else {
            ""
        };
        out.push_str(&format!(
            "\n{n}. {}{focus} [{}{again}]: {} mentions, x{:.1} velocity",
            t.keyword, t.level, t.mention_count, t.velocity
        ));
        if let Some(r) = t.top_refs.first() {
            out.push_str(&format!("\n   {}", r.title));
            if let Some(url) = &r.url {
                out.push_str(&format!(" {url}"));
            }
        }
    }

    if !sel.compressed_keywords.is_empty() {
        let still: Vec<String> = sel
            .trends
            .iter()
            .filter(|t| sel.is_compressed(&t.keyword))
            .map(|t| format!("{} ({})", t.keyword, t.mention_count))
            .collect();
        out.push_str(&format!("\nStill trending: {}", still.join(", ")));
    }
    out
}
