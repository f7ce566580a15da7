// src/notify/mod.rs
//! Outbound delivery: direct send first, then the outbox queue.

pub mod outbox;
pub mod telegram;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::DeliveryPolicy;
use crate::outcome::Outcome;
pub use outbox::{FlushReport, Outbox, QueuedMessage};
pub use telegram::TelegramNotifier;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Credential pair for one named destination.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryProfile {
    pub target: String,
    pub bot_token: String,
    pub chat_id: String,
}

impl fmt::Debug for DeliveryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryProfile")
            .field("target", &self.target)
            .field("bot_token", &format_args!("<{} chars>", self.bot_token.len()))
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl DeliveryProfile {
    /// `DIGEST_<TARGET>_` with the target upper-cased and non-alphanumerics as `_`.
    pub fn env_prefix(target: &str) -> String {
        let key: String = target
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("DIGEST_{key}_")
    }

    pub fn from_env(target: &str) -> Option<Self> {
        let prefix = Self::env_prefix(target);
        let token = std::env::var(format!("{prefix}BOT_TOKEN")).ok()?;
        let chat = std::env::var(format!("{prefix}CHAT_ID")).ok()?;
        if token.trim().is_empty() || chat.trim().is_empty() {
            return None;
        }
        Some(Self {
            target: target.to_string(),
            bot_token: token.trim().to_string(),
            chat_id: chat.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Direct,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub channel: DeliveryChannel,
    pub outcome: Outcome<()>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub requested: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<DeliveryChannel>,
    pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryReport {
    pub fn not_requested() -> Self {
        Self::default()
    }

    /// Delivery was asked for and no channel took the message.
    pub fn failed(&self) -> bool {
        self.requested && !self.ok
    }
}

/// Ordered delivery strategies for one target.
#[derive(Clone)]
pub struct Delivery {
    target: String,
    direct: Option<Arc<dyn Notifier>>,
    outbox: Option<Outbox>,
}

impl Delivery {
    pub fn new(target: &str, direct: Option<Arc<dyn Notifier>>, outbox: Option<Outbox>) -> Self {
        Self {
            target: target.to_string(),
            direct,
            outbox,
        }
    }

    /// Direct sender from the environment profile (if any); outbox when
    /// `queueFallback` is on.
    pub fn from_policy(policy: &DeliveryPolicy, http: Client) -> Self {
        let direct = DeliveryProfile::from_env(&policy.target).map(|p| {
            tracing::debug!(target: "notify", profile = ?p, "delivery profile resolved");
            Arc::new(TelegramNotifier::new(http, &policy.api_base, p)) as Arc<dyn Notifier>
        });
        let outbox = policy
            .queue_fallback
            .then(|| Outbox::new(policy.outbox_dir.clone()));
        Self::new(&policy.target, direct, outbox)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn direct(&self) -> Option<&Arc<dyn Notifier>> {
        self.direct.as_ref()
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        self.outbox.as_ref()
    }

    async fn try_direct(&self, text: &str) -> Outcome<()> {
        let Some(n) = &self.direct else {
            return Outcome::Fallback(format!("no delivery profile for target `{}`", self.target));
        };
        match n.send(text).await {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Fallback(format!("{} send failed: {e:#}", n.name())),
        }
    }

    fn try_queue(&self, text: &str, kind: &str, now: DateTime<Utc>) -> Outcome<()> {
        let Some(ob) = &self.outbox else {
            return Outcome::Fail("queue fallback disabled".into());
        };
        match ob.enqueue(&self.target, kind, text, now) {
            Ok(path) => {
                tracing::info!(target: "notify", path = %path.display(), "message queued");
                Outcome::Ok(())
            }
            Err(e) => Outcome::Fail(format!("enqueue failed: {e:#}")),
        }
    }

    pub async fn deliver(&self, text: &str, kind: &str, now: DateTime<Utc>) -> DeliveryReport {
        let mut report = DeliveryReport {
            requested: true,
            ..Default::default()
        };

        let direct = self.try_direct(text).await;
        let direct_ok = direct.is_ok();
        report.attempts.push(DeliveryAttempt {
            channel: DeliveryChannel::Direct,
            outcome: direct,
        });
        if direct_ok {
            report.ok = true;
            report.channel = Some(DeliveryChannel::Direct);
            return report;
        }

        let queued = self.try_queue(text, kind, now);
        let queued_ok = queued.is_ok();
        report.attempts.push(DeliveryAttempt {
            channel: DeliveryChannel::Queue,
            outcome: queued,
        });
        if queued_ok {
            report.ok = true;
            report.channel = Some(DeliveryChannel::Queue);
        } else {
            tracing::warn!(target: "notify", target_key = %self.target, kind, "delivery failed on every channel");
            counter!("delivery_failures_total").increment(1);
        }
        report
    }

    /// Drain the outbox through the direct sender.
    pub async fn flush_outbox(&self) -> Result<FlushReport> {
        let (Some(ob), Some(n)) = (&self.outbox, &self.direct) else {
            anyhow::bail!("flushing needs both an outbox and a delivery profile for `{}`", self.target);
        };
        ob.flush(n.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use serial_test::serial;

    struct Down;

    #[async_trait::async_trait]
    impl Notifier for Down {
        async fn send(&self, _text: &str) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn env_prefix_normalizes_target() {
        assert_eq!(DeliveryProfile::env_prefix("ops-team.eu"), "DIGEST_OPS_TEAM_EU_");
    }

    #[test]
    #[serial]
    fn profile_needs_both_variables() {
        std::env::set_var("DIGEST_UNIT_BOT_TOKEN", "t0k");
        std::env::remove_var("DIGEST_UNIT_CHAT_ID");
        assert!(DeliveryProfile::from_env("unit").is_none());
        std::env::set_var("DIGEST_UNIT_CHAT_ID", "42");
        let p = DeliveryProfile::from_env("unit").unwrap();
        assert_eq!(p.chat_id, "42");
        assert!(!format!("{p:?}").contains("t0k"));
        std::env::remove_var("DIGEST_UNIT_BOT_TOKEN");
        std::env::remove_var("DIGEST_UNIT_CHAT_ID");
    }

    #[tokio::test]
    async fn failed_direct_send_falls_back_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let d = Delivery::new("default", Some(Arc::new(Down)), Some(Outbox::new(dir.path())));
        let r = d.deliver("hello", "digest", now()).await;
        assert!(r.ok);
        assert_eq!(r.channel, Some(DeliveryChannel::Queue));
        assert_eq!(r.attempts.len(), 2);
        assert_eq!(d.outbox().unwrap().pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_channel_is_a_failure() {
        let d = Delivery::new("default", None, None);
        let r = d.deliver("hello", "digest", now()).await;
        assert!(r.failed());
        assert!(matches!(r.attempts[1].outcome, Outcome::Fail(_)));
    }
}
