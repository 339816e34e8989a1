//! Delivers notifications as signed HTTP webhooks.
//!
//! Each delivery is a single POST following the Standard Webhooks conventions: a `webhook-id`,
//! `webhook-timestamp` and `webhook-signature` header accompany a JSON body of the form
//! `{"type": ..., "timestamp": ..., "recipients": [...], "data": {...}}`. The receiving system is
//! responsible for fanning the event out to the listed recipients.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Notification, Notifier, signing};
use crate::config::WebhookConfig;
use crate::types::{UserId, abbrev_uuid};

#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    #[serde(flatten)]
    notification: &'a Notification,
    timestamp: DateTime<Utc>,
    recipients: &'a [UserId],
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.to_string(),
            secret: config.secret.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &Notification, recipients: &[UserId]) -> anyhow::Result<()> {
        let now = Utc::now();
        let payload = serde_json::to_string(&WebhookEvent {
            notification,
            timestamp: now,
            recipients,
        })?;

        let msg_id = Uuid::new_v4().to_string();
        let timestamp = now.timestamp();
        let signature = signing::sign_payload(&msg_id, timestamp, &payload, &self.secret)
            .ok_or_else(|| anyhow::anyhow!("failed to sign webhook payload"))?;

        tracing::debug!(url = %self.url, event = notification.event_type(), "Sending webhook HTTP request");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("webhook-id", &msg_id)
            .header("webhook-timestamp", timestamp.to_string())
            .header("webhook-signature", signature)
            .header("webhook-version", "1")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook endpoint returned HTTP {}", status.as_u16());
        }

        tracing::info!(
            event = notification.event_type(),
            request_id = %abbrev_uuid(&notification.request_id()),
            status = status.as_u16(),
            "Webhook delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    fn notifier(server: &MockServer) -> WebhookNotifier {
        // main.rs installs this at startup; tests must do the same
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        WebhookNotifier::new(&WebhookConfig {
            url: format!("{}/hooks/pickup", server.uri()).parse().unwrap(),
            secret: SECRET.to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_delivery_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/pickup"))
            .and(header("webhook-version", "1"))
            .and(header_exists("webhook-id"))
            .and(header_exists("webhook-timestamp"))
            .and(header_exists("webhook-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request_id = Uuid::new_v4();
        let guardian = Uuid::new_v4();
        notifier(&server)
            .deliver(
                &Notification::Rejected {
                    request_id,
                    reason: "guardian rejected: unknown person".to_string(),
                },
                &[guardian],
            )
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let request = &received[0];
        let body = String::from_utf8(request.body.clone()).unwrap();
        let header_value = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();

        assert!(signing::verify_signature(
            &header_value("webhook-id"),
            header_value("webhook-timestamp").parse().unwrap(),
            &body,
            &header_value("webhook-signature"),
            SECRET,
        ));

        let event: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(event["type"], "pickup.rejected");
        assert_eq!(event["data"]["request_id"], request_id.to_string());
        assert_eq!(event["recipients"][0], guardian.to_string());
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = notifier(&server)
            .deliver(
                &Notification::Rejected {
                    request_id: Uuid::new_v4(),
                    reason: "no".to_string(),
                },
                &[Uuid::new_v4()],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
