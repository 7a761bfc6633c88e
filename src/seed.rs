//! JSON fixtures for loading claims, payouts and owners into a store.
//!
//! ```json
//! {
//!   "owners":  [{ "id": "o1", "email": "sam@example.com", "firstName": "Sam", "lastName": "Lee" }],
//!   "claims":  [{ "id": "c1", "ownerId": "o1", "status": "processing", "claimAmountCents": 4200,
//!                 "createdAt": "2025-03-01T12:00:00Z", "updatedAt": "2025-03-01T12:00:00Z" }],
//!   "payouts": [{ "id": "p1", "claimId": "c1", "status": "completed", "amountCents": 4200,
//!                 "customerRef": "cus_1", "idempotencyKey": "payout-p1",
//!                 "createdAt": "2025-03-01T12:00:00Z", "updatedAt": "2025-03-01T12:00:00Z" }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use claimsync_common::{Claim, Owner, Payout};

use crate::store::sqlite::ClaimsDb;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub payouts: Vec<Payout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedCounts {
    pub owners: usize,
    pub claims: usize,
    pub payouts: usize,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse fixture JSON")
    }

    /// Upsert every record. Existing rows with the same id are replaced.
    pub fn apply(&self, db: &ClaimsDb) -> Result<SeedCounts> {
        for owner in &self.owners {
            db.upsert_owner(owner)?;
        }
        for claim in &self.claims {
            db.upsert_claim(claim)?;
        }
        for payout in &self.payouts {
            db.upsert_payout(payout)?;
        }
        Ok(SeedCounts {
            owners: self.owners.len(),
            claims: self.claims.len(),
            payouts: self.payouts.len(),
        })
    }
}
