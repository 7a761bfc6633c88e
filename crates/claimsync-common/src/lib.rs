//! Shared domain types for the claimsync reconciler.
//!
//! Claims, payouts, owners and audit trail entries as the entity store sees
//! them, plus the `Clock` used to evaluate every time threshold.

pub mod audit;
pub mod claim;
pub mod clock;
pub mod ids;
pub mod owner;
pub mod payout;

pub use audit::{Actor, AuditDetail, AuditEntry, AuditKind, ManualRetryOutcome, ReconciliationRule};
pub use claim::{Claim, ClaimStatus, ReviewLock};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{ClaimId, OwnerId, PayoutId};
pub use owner::Owner;
pub use payout::{FailureType, Payout, PayoutStatus};
