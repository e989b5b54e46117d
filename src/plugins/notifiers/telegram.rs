use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::plugins::traits::Notifier;
use crate::utils::error::DeliveryError;

/// Telegram Bot API envelope. Only the fields we act on.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    token: Option<String>,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        TelegramNotifier {
            client: Client::new(),
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let token = self.token.as_deref().ok_or(DeliveryError::NotConfigured)?;

        let payload = json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self.client.post(self.endpoint(token)).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // The API answers errors with a JSON body too; fall back to raw text.
        let parsed = serde_json::from_str::<ApiResponse>(&body).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(()),
            Some(api) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: api.description.unwrap_or_else(|| status.to_string()),
            }),
            None if status.is_success() => Ok(()),
            None => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: body,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer, token: Option<&str>) -> TelegramNotifier {
        TelegramNotifier::new(&TelegramConfig {
            token: token.map(str::to_string),
            api_base: format!("{}/", server.uri()),
        })
    }

    #[tokio::test]
    async fn test_send_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(json!({"chat_id": "42", "text": "🚗 Gol"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server, Some("TOKEN")).send("42", "🚗 Gol").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"ok": false, "description": "Forbidden: bot was blocked by the user"})),
            )
            .mount(&server)
            .await;

        let err = notifier(&server, Some("TOKEN")).send("42", "hi").await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Rejected {
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_ok_false_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false})))
            .mount(&server)
            .await;

        let err = notifier(&server, Some("TOKEN")).send("42", "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_missing_token_is_not_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = notifier(&server, Some("  "));
        assert!(!notifier.is_configured());
        assert_eq!(notifier.send("42", "hi").await.unwrap_err(), DeliveryError::NotConfigured);
    }
}
