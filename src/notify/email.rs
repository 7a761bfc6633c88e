use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::warn;

use super::Notification;

const EMAIL_TIMEOUT: Duration = Duration::from_secs(15);

/// SendGrid-compatible mail API. Only `202 Accepted` counts as delivered.
pub struct EmailNotifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl EmailNotifier {
    pub fn new(api_base: &str, api_key: &str, from: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(EMAIL_TIMEOUT)
            .build()
            .context("Failed to build email client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v3/mail/send", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }

    pub async fn send_to(&self, to: &str, notification: &Notification) -> bool {
        let body = json!({
            "personalizations": [{
                "to": [{ "email": to }],
                "subject": notification.subject(),
            }],
            "from": { "email": self.from, "name": "claimsync" },
            "content": [{ "type": "text/plain", "value": notification.text() }],
        });
        let result = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status() == reqwest::StatusCode::ACCEPTED => true,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), to = %to, "Mail API rejected message");
                false
            }
            Err(e) => {
                warn!(error = %e, to = %to, "Mail API request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use claimsync_common::ClaimId;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn processed() -> Notification {
        Notification::PayoutProcessed {
            claim_id: ClaimId::new("c7"),
            owner_name: "Robin Lee".into(),
            amount_cents: 19_999,
            currency: "usd".into(),
        }
    }

    #[tokio::test]
    async fn accepted_means_delivered() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let app = Router::new()
            .route(
                "/v3/mail/send",
                post(
                    |State(seen): State<Arc<Mutex<Vec<(Option<String>, Value)>>>>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((auth, body));
                        StatusCode::ACCEPTED
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve(app).await;

        let email = EmailNotifier::new(&base, "SG.key", "alerts@claimsync.local").unwrap();
        assert!(email.send_to("robin@example.com", &processed()).await);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("Bearer SG.key"));
        let body = &seen[0].1;
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "robin@example.com");
        assert_eq!(
            body["personalizations"][0]["subject"],
            "Payment Processed - Claim c7"
        );
        assert!(
            body["content"][0]["value"]
                .as_str()
                .unwrap()
                .contains("USD 199.99")
        );
    }

    #[tokio::test]
    async fn plain_ok_is_not_delivery() {
        let base = serve(Router::new().route("/v3/mail/send", post(|| async { StatusCode::OK }))).await;
        let email = EmailNotifier::new(&base, "SG.key", "alerts@claimsync.local").unwrap();
        assert!(!email.send_to("robin@example.com", &processed()).await);
    }
}
