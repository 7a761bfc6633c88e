//! Payment processor seam.
//!
//! The reconciler only ever asks the processor to execute a payout it already
//! knows about, always with the payout's stored idempotency key, so a retry
//! that races a late success is deduplicated on the processor side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use claimsync_common::Payout;

pub mod stripe;

pub use stripe::StripeGateway;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub customer_ref: String,
    pub idempotency_key: String,
    pub description: String,
}

impl PayoutRequest {
    pub fn for_payout(payout: &Payout) -> Self {
        Self {
            amount_cents: payout.amount_cents,
            currency: payout.currency.clone(),
            customer_ref: payout.customer_ref.clone(),
            idempotency_key: payout.idempotency_key.clone(),
            description: format!("Claim payout retry for claim {}", payout.claim_id),
        }
    }
}

/// Result of one payout attempt. Transport errors are folded into `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Succeeded { transaction_id: String },
    Failed { error: String },
}

impl PayoutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn execute_payout(&self, request: &PayoutRequest) -> PayoutOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use claimsync_common::PayoutStatus;

    #[test]
    fn request_carries_stored_idempotency_key() {
        let mut payout = Payout::new("p1", "c9", PayoutStatus::Failed, 12_345, Utc::now())
            .with_customer_ref("cus_42");
        payout.idempotency_key = "idem-fixed".into();
        let request = PayoutRequest::for_payout(&payout);
        assert_eq!(request.idempotency_key, "idem-fixed");
        assert_eq!(request.amount_cents, 12_345);
        assert_eq!(request.customer_ref, "cus_42");
        assert!(request.description.contains("c9"));
    }
}
