//! Doubles for unit tests inside the crate.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use claimsync_common::SystemClock;

use crate::gateway::{PaymentGateway, PayoutOutcome, PayoutRequest};
use crate::notify::{Channel, Notification, Notifier};
use crate::reconcile::{Reconciler, ReconcilerConfig};
use crate::store::MemoryStore;

/// Always succeeds with a fixed transaction id.
#[derive(Default)]
pub struct ApprovingGateway {
    pub requests: Mutex<Vec<PayoutRequest>>,
}

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn execute_payout(&self, request: &PayoutRequest) -> PayoutOutcome {
        self.requests.lock().unwrap().push(request.clone());
        PayoutOutcome::Succeeded {
            transaction_id: "tx_test".to_string(),
        }
    }
}

#[derive(Default)]
pub struct SilentNotifier {
    pub sent: Mutex<Vec<(Channel, Notification)>>,
}

#[async_trait]
impl Notifier for SilentNotifier {
    async fn send(&self, channel: &Channel, notification: &Notification) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((channel.clone(), notification.clone()));
        true
    }
}

pub fn reconciler_with_store() -> (Arc<MemoryStore>, Arc<Reconciler>) {
    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(ApprovingGateway::default()),
        Arc::new(SilentNotifier::default()),
        clock,
        ReconcilerConfig::default(),
    );
    (store, Arc::new(reconciler))
}
