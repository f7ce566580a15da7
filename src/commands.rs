// src/commands.rs
//! On-demand command surface shared by the CLI and `POST /command`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::app::{App, EventOptions};
use crate::digest::{run_digest, DigestOptions};
use crate::error::{CommandError, ErrorCode};
use crate::ingest::normalize::normalize_keyword;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Digest {
        force: bool,
        skip_collect: bool,
        send: bool,
    },
    Event {
        skip_collect: bool,
        send: bool,
    },
    KeywordAdd(String),
    KeywordRemove(String),
    SourceOn(String),
    SourceOff(String),
    FlushOutbox,
}

const KNOWN: &[&str] = &[
    "status",
    "digest",
    "send",
    "event",
    "keyword add",
    "keyword remove",
    "source on",
    "source off",
    "flush-outbox",
];

/// Result of one command, as printed by the CLI and returned over HTTP.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_text: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            code: None,
            message: message.into(),
            digest_text: None,
            data,
        }
    }

    pub fn error(err: &CommandError) -> Self {
        Self {
            success: false,
            code: Some(err.code()),
            message: err.to_string(),
            digest_text: None,
            data: Value::Null,
        }
    }
}

fn suggest(input: &str) -> Option<String> {
    KNOWN
        .iter()
        .map(|k| (strsim::levenshtein(input, k), *k))
        .filter(|(d, _)| *d <= 3)
        .min_by_key(|(d, _)| *d)
        .map(|(_, k)| k.to_string())
}

fn unknown(text: &str) -> CommandError {
    let head: String = text
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let suggestion = suggest(&head).or_else(|| {
        let first = head.split(' ').next().unwrap_or_default();
        suggest(first)
    });
    CommandError::Unknown {
        input: text.trim().to_string(),
        suggestion,
    }
}

/// Parse free text such as `digest --force`, `/keyword add vibe coding` or
/// `source off reddit`.
pub fn parse(text: &str) -> Result<Command, CommandError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let Some(first) = words.first() else {
        return Err(CommandError::InvalidArgument("empty command".into()));
    };
    let verb = first.trim_start_matches('/').to_lowercase();
    let rest = &words[1..];
    let flag = |name: &str| rest.iter().any(|w| w.eq_ignore_ascii_case(name));
    let check_flags = |allowed: &[&str]| -> Result<(), CommandError> {
        match rest.iter().find(|w| !allowed.iter().any(|a| w.eq_ignore_ascii_case(a))) {
            Some(w) => Err(CommandError::InvalidArgument(format!("unexpected `{w}`"))),
            None => Ok(()),
        }
    };

    match verb.as_str() {
        "status" => {
            check_flags(&[])?;
            Ok(Command::Status)
        }
        "digest" => {
            check_flags(&["--force", "--skip-collect", "--send"])?;
            Ok(Command::Digest {
                force: flag("--force"),
                skip_collect: flag("--skip-collect"),
                send: flag("--send"),
            })
        }
        "send" => {
            check_flags(&["--force", "--skip-collect"])?;
            Ok(Command::Digest {
                force: flag("--force"),
                skip_collect: flag("--skip-collect"),
                send: true,
            })
        }
        "event" => {
            check_flags(&["--skip-collect", "--send"])?;
            Ok(Command::Event {
                skip_collect: flag("--skip-collect"),
                send: flag("--send"),
            })
        }
        "flush-outbox" => {
            check_flags(&[])?;
            Ok(Command::FlushOutbox)
        }
        "keyword" | "keywords" => {
            let usage = || CommandError::InvalidArgument("usage: keyword add|remove <keyword>".into());
            let (sub, kw) = rest.split_first().ok_or_else(usage)?;
            let kw = normalize_keyword(&kw.join(" "));
            if kw.is_empty() {
                return Err(usage());
            }
            match sub.to_lowercase().as_str() {
                "add" | "on" | "enable" => Ok(Command::KeywordAdd(kw)),
                "remove" | "rm" | "off" | "disable" => Ok(Command::KeywordRemove(kw)),
                _ => Err(usage()),
            }
        }
        "source" | "sources" => {
            let usage = || CommandError::InvalidArgument("usage: source on|off <id>".into());
            match rest {
                [sub, id] => match sub.to_lowercase().as_str() {
                    "on" | "enable" => Ok(Command::SourceOn(id.to_string())),
                    "off" | "disable" => Ok(Command::SourceOff(id.to_string())),
                    _ => Err(usage()),
                },
                _ => Err(usage()),
            }
        }
        _ => Err(unknown(text)),
    }
}

fn to_value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

pub async fn execute(app: &mut App, cmd: Command, now: DateTime<Utc>) -> Result<CommandOutcome> {
    tracing::info!(command = ?cmd, "executing command");
    match cmd {
        Command::Status => {
            let st = app.status().await?;
            let msg = format!(
                "{} items, {} enabled keywords, {} trends, {} alerts",
                st.counts.items, st.counts.enabled_keywords, st.counts.trends, st.counts.alerts
            );
            Ok(CommandOutcome::ok(msg, to_value(&st)))
        }
        Command::Digest {
            force,
            skip_collect,
            send,
        } => {
            let report = run_digest(
                app,
                DigestOptions {
                    now,
                    force,
                    skip_collect,
                    deliver: send,
                },
            )
            .await?;
            let message = if report.success {
                format!("digest built with {} trend(s)", report.keywords.len())
            } else {
                "digest built but delivery failed".to_string()
            };
            Ok(CommandOutcome {
                success: report.success,
                code: report.code,
                message,
                digest_text: Some(report.digest_text.clone()),
                data: to_value(&report),
            })
        }
        Command::Event { skip_collect, send } => {
            let report = app
                .run_event(EventOptions {
                    now,
                    skip_collect,
                    deliver: send,
                })
                .await?;
            let message = match report.evaluation.created.len() {
                0 => "no alerts".to_string(),
                n if report.success => format!("{n} alert(s) created"),
                n => format!("{n} alert(s) created but delivery failed"),
            };
            Ok(CommandOutcome {
                success: report.success,
                code: report.code,
                message,
                digest_text: report.alert_text.clone(),
                data: to_value(&report),
            })
        }
        Command::KeywordAdd(kw) => {
            let enabled = app.store.enable_keyword(&kw, now).await?;
            let listed = app.cfg.add_keyword(&kw);
            if listed {
                app.save_config()?;
            }
            let msg = if enabled {
                format!("keyword `{kw}` enabled")
            } else {
                format!("keyword `{kw}` was already enabled")
            };
            Ok(CommandOutcome::ok(msg, json!({ "keyword": kw, "changed": enabled || listed })))
        }
        Command::KeywordRemove(kw) => {
            let disabled = app.store.disable_keyword(&kw).await?;
            let unlisted = app.cfg.remove_keyword(&kw);
            if unlisted {
                app.save_config()?;
            }
            if !disabled && !unlisted {
                return Ok(CommandOutcome::error(&CommandError::NotFound(format!(
                    "keyword `{kw}`"
                ))));
            }
            Ok(CommandOutcome::ok(
                format!("keyword `{kw}` disabled"),
                json!({ "keyword": kw, "changed": true }),
            ))
        }
        Command::SourceOn(id) => toggle_source(app, &id, true),
        Command::SourceOff(id) => toggle_source(app, &id, false),
        Command::FlushOutbox => match app.delivery.flush_outbox().await {
            Ok(r) => Ok(CommandOutcome {
                success: r.remaining == 0,
                code: (r.remaining > 0).then_some(ErrorCode::DeliveryFailed),
                message: format!("{} delivered, {} still queued", r.delivered, r.remaining),
                digest_text: None,
                data: to_value(&r),
            }),
            Err(e) => Ok(CommandOutcome {
                success: false,
                code: Some(ErrorCode::DeliveryFailed),
                message: format!("{e:#}"),
                digest_text: None,
                data: Value::Null,
            }),
        },
    }
}

fn toggle_source(app: &mut App, id: &str, on: bool) -> Result<CommandOutcome> {
    match app.cfg.set_source_enabled(id, on) {
        Ok(changed) => {
            if changed {
                app.save_config()?;
            }
            let state = if on { "enabled" } else { "disabled" };
            Ok(CommandOutcome::ok(
                format!("source `{id}` {state}"),
                json!({ "source": id, "enabled": on, "changed": changed }),
            ))
        }
        Err(e) => Ok(CommandOutcome::error(&e)),
    }
}

/// Parse and run free text; parse failures become failed outcomes.
pub async fn run_text(app: &mut App, text: &str, now: DateTime<Utc>) -> Result<CommandOutcome> {
    match parse(text) {
        Ok(cmd) => execute(app, cmd, now).await,
        Err(e) => {
            tracing::info!(input = %text.trim(), code = %e.code(), "command rejected");
            Ok(CommandOutcome::error(&e))
        }
    }
}
