//! Shared fixtures for the reconciliation tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use claimsync::gateway::{PaymentGateway, PayoutOutcome, PayoutRequest};
use claimsync::notify::{Channel, Notification, Notifier};
use claimsync::reconcile::{Reconciler, ReconcilerConfig};
use claimsync::store::MemoryStore;
use claimsync_common::{
    Claim, ClaimStatus, Clock, ManualClock, Owner, OwnerId, Payout, PayoutStatus,
};

/// Replays queued outcomes, then keeps returning the fallback. Every request
/// is recorded.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<PayoutOutcome>>,
    fallback: PayoutOutcome,
    pub requests: Mutex<Vec<PayoutRequest>>,
}

impl ScriptedGateway {
    pub fn approving() -> Self {
        Self::always(PayoutOutcome::Succeeded {
            transaction_id: "tx_ok".to_string(),
        })
    }

    pub fn declining(error: &str) -> Self {
        Self::always(PayoutOutcome::Failed {
            error: error.to_string(),
        })
    }

    pub fn always(fallback: PayoutOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, outcome: PayoutOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn requests(&self) -> Vec<PayoutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.idempotency_key)
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn execute_payout(&self, request: &PayoutRequest) -> PayoutOutcome {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Records every notification and reports `deliver` for each.
pub struct RecordingNotifier {
    deliver: bool,
    pub sent: Mutex<Vec<(Channel, Notification)>>,
}

impl RecordingNotifier {
    pub fn delivering() -> Self {
        Self {
            deliver: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            deliver: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(Channel, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn escalations(&self) -> Vec<Channel> {
        self.sent()
            .into_iter()
            .filter(|(_, n)| matches!(n, Notification::PayoutEscalation { .. }))
            .map(|(c, _)| c)
            .collect()
    }

    pub fn summaries(&self) -> usize {
        self.sent()
            .iter()
            .filter(|(_, n)| matches!(n, Notification::RunSummary(_)))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &Channel, notification: &Notification) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((channel.clone(), notification.clone()));
        self.deliver
    }
}

/// Fixed "now" for every fixture.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    now() - Duration::minutes(minutes)
}

pub fn claim(id: &str, status: ClaimStatus, updated_minutes_ago: i64) -> Claim {
    Claim::new(id, "o1", status, 4200, minutes_ago(updated_minutes_ago))
}

pub fn payout(id: &str, claim_id: &str, status: PayoutStatus, created_minutes_ago: i64) -> Payout {
    Payout::new(id, claim_id, status, 4200, minutes_ago(created_minutes_ago))
        .with_customer_ref("cus_1")
}

pub fn owner() -> Owner {
    Owner {
        id: OwnerId::new("o1"),
        email: "sam@example.com".to_string(),
        first_name: "Sam".to_string(),
        last_name: "Lee".to_string(),
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            ScriptedGateway::approving(),
            RecordingNotifier::delivering(),
            ReconcilerConfig::default(),
        )
    }

    pub fn with_gateway(gateway: ScriptedGateway) -> Self {
        Self::build(
            gateway,
            RecordingNotifier::delivering(),
            ReconcilerConfig::default(),
        )
    }

    pub fn build(
        gateway: ScriptedGateway,
        notifier: RecordingNotifier,
        config: ReconcilerConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(now()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        store.insert_owner(owner());
        let gateway = Arc::new(gateway);
        let notifier = Arc::new(notifier);
        let reconciler = Reconciler::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            clock.clone() as Arc<dyn Clock>,
            config,
        );
        Self {
            clock,
            store,
            gateway,
            notifier,
            reconciler,
        }
    }
}
