// src/notify/telegram.rs
use anyhow::{Context, Result};
use reqwest::Client;

use super::{DeliveryProfile, Notifier};

/// Bot API message size limit, in characters.
const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    profile: DeliveryProfile,
}

impl TelegramNotifier {
    pub fn new(client: Client, api_base: &str, profile: DeliveryProfile) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            profile,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let text: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.profile.bot_token);
        let body = serde_json::json!({
            "chat_id": self.profile.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("telegram post")?
            .error_for_status()
            .map_err(|e| e.without_url())
            .context("telegram non-2xx")?;
        tracing::debug!(target: "notify", target_key = %self.profile.target, chars = text.chars().count(), "message sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile() -> DeliveryProfile {
        DeliveryProfile {
            target: "ops".into(),
            bot_token: "123:abc".into(),
            chat_id: "-100".into(),
        }
    }

    #[tokio::test]
    async fn posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({ "chat_id": "-100", "text": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let n = TelegramNotifier::new(Client::new(), &server.uri(), profile());
        n.send("hi").await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_an_error_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let n = TelegramNotifier::new(Client::new(), &server.uri(), profile());
        let err = n.send("hi").await.unwrap_err();
        assert!(!format!("{err:#}").contains("123:abc"));
    }
}
