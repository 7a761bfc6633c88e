use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use super::{PaymentGateway, PayoutOutcome, PayoutRequest};
use crate::config::PaymentsSection;

/// Successful processor response (subset of fields).
#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

/// Stripe-compatible HTTP gateway: form-encoded POST, bearer auth and an
/// `Idempotency-Key` header.
pub struct StripeGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl StripeGateway {
    pub fn new(section: &PaymentsSection) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .context("Failed to build payment HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                section.api_base.trim_end_matches('/'),
                section.payout_path
            ),
            api_key: section.api_key.clone(),
        })
    }

    async fn post(&self, api_key: &str, request: &PayoutRequest) -> Result<PayoutOutcome> {
        let amount = request.amount_cents.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("customer", request.customer_ref.as_str()),
            ("description", request.description.as_str()),
        ];
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .context("Payment request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("Failed to read payment response")?;
        if status.is_success() {
            let parsed: ChargeResponse =
                serde_json::from_str(&body).context("Failed to parse payment response")?;
            return Ok(PayoutOutcome::Succeeded {
                transaction_id: parsed.id,
            });
        }

        let error = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => envelope
                .error
                .message
                .or(envelope.error.code)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            Err(_) => format!("HTTP {}", status.as_u16()),
        };
        error!(status = status.as_u16(), error = %error, "Payment processor rejected payout");
        Ok(PayoutOutcome::Failed { error })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn execute_payout(&self, request: &PayoutRequest) -> PayoutOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return PayoutOutcome::Failed {
                error: "payment API key not configured".to_string(),
            };
        };
        debug!(
            idempotency_key = %request.idempotency_key,
            amount_cents = request.amount_cents,
            "Executing payout"
        );
        match self.post(api_key, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Payment request error");
                PayoutOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        }
    }
}
