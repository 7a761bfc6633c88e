//! Typed error hierarchy for the reconciler.
//!
//! - `ReconcileError`: per-document and entrypoint failures
//! - `ConfigError`: configuration loading failures

use claimsync_common::{ClaimId, OwnerId, PayoutId};
use thiserror::Error;

/// Errors raised while reconciling a single claim or payout, or by the
/// operator entrypoints.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Claim {id} not found")]
    ClaimNotFound { id: ClaimId },

    #[error("Payout {id} not found")]
    PayoutNotFound { id: PayoutId },

    #[error("Owner {id} not found")]
    OwnerNotFound { id: OwnerId },

    #[error("Operator authorization required")]
    Unauthorized,

    #[error("Entity store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Failed to persist reconciliation run report: {0}")]
    ReportPersistence(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ClaimNotFound { .. } | Self::PayoutNotFound { .. } | Self::OwnerNotFound { .. }
        )
    }
}

/// Errors from loading `claimsync.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
