//! Wiring from configuration to a ready reconciler.

use std::sync::Arc;

use anyhow::{Context, Result};

use claimsync_common::{Clock, SystemClock};

use crate::config::ClaimsyncConfig;
use crate::gateway::StripeGateway;
use crate::notify::NotificationRouter;
use crate::operator::TokenAuthorizer;
use crate::reconcile::Reconciler;
use crate::store::SqliteStore;

pub struct Runtime {
    pub store: Arc<SqliteStore>,
    pub reconciler: Arc<Reconciler>,
    pub authorizer: Arc<TokenAuthorizer>,
}

impl Runtime {
    /// Open the database and build the HTTP-backed collaborators.
    pub fn from_config(config: &ClaimsyncConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(
            SqliteStore::open(&config.database.path, clock.clone()).with_context(|| {
                format!(
                    "Failed to open database at {}",
                    config.database.path.display()
                )
            })?,
        );
        let payments = Arc::new(StripeGateway::new(&config.payments)?);
        let notifier = Arc::new(NotificationRouter::from_config(&config.notifications)?);
        let reconciler = Reconciler::new(
            store.clone(),
            payments,
            notifier,
            clock,
            config.reconciler_config(),
        );
        Ok(Self {
            store,
            reconciler: Arc::new(reconciler),
            authorizer: Arc::new(TokenAuthorizer::from_config(&config.operators)),
        })
    }
}
