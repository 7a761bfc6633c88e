//! Audit trail and run-report persistence.
//!
//! Entries are append-only and written through the entity store right after
//! the mutation they describe. Run reports are written once, when a pass ends.

mod logger;

pub use logger::AuditLogger;
