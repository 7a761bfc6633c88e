//! Operator identity for the manual entrypoints.

use std::collections::BTreeMap;

use claimsync_common::Actor;

use crate::config::OperatorsSection;
use crate::errors::ReconcileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: String,
}

impl Operator {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn actor(&self) -> Actor {
        Actor::Operator(self.id.clone())
    }
}

/// Maps a presented credential to an operator.
pub trait OperatorAuthorizer: Send + Sync {
    fn authorize(&self, token: Option<&str>) -> Result<Operator, ReconcileError>;
}

/// Static bearer tokens from `[operators.tokens]`.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthorizer {
    tokens: BTreeMap<String, String>,
}

impl TokenAuthorizer {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn from_config(section: &OperatorsSection) -> Self {
        Self::new(section.tokens.clone())
    }
}

impl OperatorAuthorizer for TokenAuthorizer {
    fn authorize(&self, token: Option<&str>) -> Result<Operator, ReconcileError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ReconcileError::Unauthorized)?;
        self.tokens
            .iter()
            .find(|(_, expected)| expected.as_str() == token)
            .map(|(id, _)| Operator::new(id.clone()))
            .ok_or(ReconcileError::Unauthorized)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
}
