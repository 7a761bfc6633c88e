use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use claimsync_common::{
    AuditEntry, Claim, ClaimId, ClaimStatus, Clock, FailureType, Owner, OwnerId, Payout, PayoutId,
    PayoutStatus, ReviewLock,
};

use super::{AuditFilter, ClaimFilter, ClaimPatch, EntityStore, PayoutFilter, PayoutPatch};
use crate::reconcile::report::RunReport;

/// Async-safe handle to the claims database.
///
/// Wraps `ClaimsDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ClaimsDb>>,
}

impl DbHandle {
    pub fn new(db: ClaimsDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ClaimsDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup seeding and
    /// tests only, never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ClaimsDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

fn ts(at: DateTime<Utc>) -> String {
    // Fixed-width UTC so lexicographic order in SQL equals time order.
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

const CLAIM_COLUMNS: &str = "id, owner_id, status, claim_amount_cents, created_at, updated_at, \
     settled_at, reconciled_at, reconciled_reason, review_locked_by, review_locked_at";

const PAYOUT_COLUMNS: &str = "id, claim_id, status, amount_cents, currency, customer_ref, \
     idempotency_key, retry_count, failure_type, last_error, last_retry_at, escalated_at, \
     escalated_reason, transaction_id, completed_at, notification_sent, notification_sent_at, \
     created_at, updated_at";

/// Raw claim row; converted with `into_claim` so parse failures become errors
/// instead of rusqlite panics.
struct ClaimRow {
    id: String,
    owner_id: String,
    status: String,
    claim_amount_cents: i64,
    created_at: String,
    updated_at: String,
    settled_at: Option<String>,
    reconciled_at: Option<String>,
    reconciled_reason: Option<String>,
    review_locked_by: Option<String>,
    review_locked_at: Option<String>,
}

impl ClaimRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            status: row.get(2)?,
            claim_amount_cents: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            settled_at: row.get(6)?,
            reconciled_at: row.get(7)?,
            reconciled_reason: row.get(8)?,
            review_locked_by: row.get(9)?,
            review_locked_at: row.get(10)?,
        })
    }

    fn into_claim(self) -> Result<Claim> {
        let review_lock = match (self.review_locked_by, self.review_locked_at) {
            (Some(locked_by), Some(at)) => Some(ReviewLock {
                locked_by,
                locked_at: parse_ts(&at)?,
            }),
            _ => None,
        };
        Ok(Claim {
            status: ClaimStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            id: ClaimId::new(self.id),
            owner_id: OwnerId::new(self.owner_id),
            claim_amount_cents: self.claim_amount_cents,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            settled_at: parse_opt_ts(self.settled_at)?,
            reconciled_at: parse_opt_ts(self.reconciled_at)?,
            reconciled_reason: self.reconciled_reason,
            review_lock,
        })
    }
}

struct PayoutRow {
    id: String,
    claim_id: String,
    status: String,
    amount_cents: i64,
    currency: String,
    customer_ref: String,
    idempotency_key: String,
    retry_count: u32,
    failure_type: String,
    last_error: Option<String>,
    last_retry_at: Option<String>,
    escalated_at: Option<String>,
    escalated_reason: Option<String>,
    transaction_id: Option<String>,
    completed_at: Option<String>,
    notification_sent: bool,
    notification_sent_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PayoutRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            claim_id: row.get(1)?,
            status: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            customer_ref: row.get(5)?,
            idempotency_key: row.get(6)?,
            retry_count: row.get(7)?,
            failure_type: row.get(8)?,
            last_error: row.get(9)?,
            last_retry_at: row.get(10)?,
            escalated_at: row.get(11)?,
            escalated_reason: row.get(12)?,
            transaction_id: row.get(13)?,
            completed_at: row.get(14)?,
            notification_sent: row.get(15)?,
            notification_sent_at: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn into_payout(self) -> Result<Payout> {
        Ok(Payout {
            status: PayoutStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            failure_type: FailureType::from_str(&self.failure_type).map_err(anyhow::Error::msg)?,
            id: PayoutId::new(self.id),
            claim_id: ClaimId::new(self.claim_id),
            amount_cents: self.amount_cents,
            currency: self.currency,
            customer_ref: self.customer_ref,
            idempotency_key: self.idempotency_key,
            retry_count: self.retry_count,
            last_error: self.last_error,
            last_retry_at: parse_opt_ts(self.last_retry_at)?,
            escalated_at: parse_opt_ts(self.escalated_at)?,
            escalated_reason: self.escalated_reason,
            transaction_id: self.transaction_id,
            completed_at: parse_opt_ts(self.completed_at)?,
            notification_sent: self.notification_sent,
            notification_sent_at: parse_opt_ts(self.notification_sent_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

pub struct ClaimsDb {
    conn: Connection,
}

impl ClaimsDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure SQLite")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS owners (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS claims (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    claim_amount_cents INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    settled_at TEXT,
                    reconciled_at TEXT,
                    reconciled_reason TEXT,
                    review_locked_by TEXT,
                    review_locked_at TEXT
                );

                CREATE TABLE IF NOT EXISTS payouts (
                    id TEXT PRIMARY KEY,
                    claim_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    amount_cents INTEGER NOT NULL,
                    currency TEXT NOT NULL DEFAULT 'usd',
                    customer_ref TEXT NOT NULL DEFAULT '',
                    idempotency_key TEXT NOT NULL,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    failure_type TEXT NOT NULL DEFAULT 'payment_execution',
                    last_error TEXT,
                    last_retry_at TEXT,
                    escalated_at TEXT,
                    escalated_reason TEXT,
                    transaction_id TEXT,
                    completed_at TEXT,
                    notification_sent INTEGER NOT NULL DEFAULT 0,
                    notification_sent_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS audit_trail (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    type TEXT NOT NULL,
                    claim_id TEXT,
                    payout_id TEXT,
                    timestamp TEXT NOT NULL,
                    entry TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reconciliation_runs (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL UNIQUE,
                    started_at TEXT NOT NULL,
                    report TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_claims_status ON claims(status, updated_at);
                CREATE INDEX IF NOT EXISTS idx_claims_review_lock ON claims(review_locked_at);
                CREATE INDEX IF NOT EXISTS idx_payouts_claim ON payouts(claim_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_payouts_status ON payouts(status);
                CREATE INDEX IF NOT EXISTS idx_audit_payout ON audit_trail(payout_id);
                CREATE INDEX IF NOT EXISTS idx_audit_claim ON audit_trail(claim_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Claims ────────────────────────────────────────────────────────

    pub fn upsert_claim(&self, claim: &Claim) -> Result<()> {
        let (locked_by, locked_at) = match &claim.review_lock {
            Some(lock) => (Some(lock.locked_by.clone()), Some(ts(lock.locked_at))),
            None => (None, None),
        };
        self.conn
            .execute(
                "INSERT OR REPLACE INTO claims (id, owner_id, status, claim_amount_cents, created_at,
                    updated_at, settled_at, reconciled_at, reconciled_reason, review_locked_by,
                    review_locked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    claim.id.as_str(),
                    claim.owner_id.as_str(),
                    claim.status.as_str(),
                    claim.claim_amount_cents,
                    ts(claim.created_at),
                    ts(claim.updated_at),
                    claim.settled_at.map(ts),
                    claim.reconciled_at.map(ts),
                    claim.reconciled_reason,
                    locked_by,
                    locked_at,
                ],
            )
            .context("Failed to write claim")?;
        Ok(())
    }

    pub fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>> {
        let sql = format!("SELECT {} FROM claims WHERE id = ?1", CLAIM_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.as_str()], ClaimRow::from_row)
            .optional()
            .context("Failed to query claim")?;
        row.map(ClaimRow::into_claim).transpose()
    }

    pub fn query_claims(&self, filter: &ClaimFilter) -> Result<Vec<Claim>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", marks));
            values.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(cutoff) = filter.updated_before {
            clauses.push("updated_at < ?".to_string());
            values.push(Value::Text(ts(cutoff)));
        }
        if let Some(cutoff) = filter.review_locked_before {
            clauses.push("review_locked_at IS NOT NULL AND review_locked_at < ?".to_string());
            values.push(Value::Text(ts(cutoff)));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM claims {} ORDER BY created_at, id LIMIT ?",
            CLAIM_COLUMNS, where_clause
        );
        values.push(limit_value(filter.limit));

        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare claim query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ClaimRow::from_row)
            .context("Failed to query claims")?;
        let mut claims = Vec::new();
        for row in rows {
            claims.push(row.context("Failed to read claim row")?.into_claim()?);
        }
        Ok(claims)
    }

    /// Read-modify-write inside one transaction so the status guard and the
    /// write see the same row.
    pub fn update_claim(
        &self,
        id: &ClaimId,
        expected: &[ClaimStatus],
        patch: &ClaimPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin claim update")?;
        let Some(mut claim) = self.get_claim(id)? else {
            return Ok(false);
        };
        if !expected.is_empty() && !expected.contains(&claim.status) {
            return Ok(false);
        }
        patch.apply(&mut claim, now);
        self.upsert_claim(&claim)?;
        tx.commit().context("Failed to commit claim update")?;
        Ok(true)
    }

    /// Drop expired locks. `updated_at` is left alone so the settling age
    /// checks later in the same pass still see the claim as stale.
    pub fn clear_review_locks(
        &self,
        ids: &[ClaimId],
        locked_before: DateTime<Utc>,
    ) -> Result<Vec<ClaimId>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin lock sweep")?;
        let mut cleared = Vec::new();
        {
            let mut stmt = self
                .conn
                .prepare(
                    "UPDATE claims SET review_locked_by = NULL, review_locked_at = NULL
                     WHERE id = ?1 AND review_locked_at IS NOT NULL AND review_locked_at < ?2",
                )
                .context("Failed to prepare lock sweep")?;
            for id in ids {
                let changed = stmt
                    .execute(params![id.as_str(), ts(locked_before)])
                    .context("Failed to clear review lock")?;
                if changed > 0 {
                    cleared.push(id.clone());
                }
            }
        }
        tx.commit().context("Failed to commit lock sweep")?;
        Ok(cleared)
    }

    // ── Payouts ───────────────────────────────────────────────────────

    pub fn upsert_payout(&self, payout: &Payout) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO payouts (id, claim_id, status, amount_cents, currency,
                    customer_ref, idempotency_key, retry_count, failure_type, last_error,
                    last_retry_at, escalated_at, escalated_reason, transaction_id, completed_at,
                    notification_sent, notification_sent_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19)",
                params![
                    payout.id.as_str(),
                    payout.claim_id.as_str(),
                    payout.status.as_str(),
                    payout.amount_cents,
                    payout.currency,
                    payout.customer_ref,
                    payout.idempotency_key,
                    payout.retry_count,
                    payout.failure_type.as_str(),
                    payout.last_error,
                    payout.last_retry_at.map(ts),
                    payout.escalated_at.map(ts),
                    payout.escalated_reason,
                    payout.transaction_id,
                    payout.completed_at.map(ts),
                    payout.notification_sent,
                    payout.notification_sent_at.map(ts),
                    ts(payout.created_at),
                    ts(payout.updated_at),
                ],
            )
            .context("Failed to write payout")?;
        Ok(())
    }

    pub fn get_payout(&self, id: &PayoutId) -> Result<Option<Payout>> {
        let sql = format!("SELECT {} FROM payouts WHERE id = ?1", PAYOUT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.as_str()], PayoutRow::from_row)
            .optional()
            .context("Failed to query payout")?;
        row.map(PayoutRow::into_payout).transpose()
    }

    pub fn query_payouts(&self, filter: &PayoutFilter) -> Result<Vec<Payout>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref claim_id) = filter.claim_id {
            clauses.push("claim_id = ?".to_string());
            values.push(Value::Text(claim_id.as_str().to_string()));
        }
        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", marks));
            values.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order = if filter.newest_first {
            "created_at DESC, id DESC"
        } else {
            "created_at, id"
        };
        let sql = format!(
            "SELECT {} FROM payouts {} ORDER BY {} LIMIT ?",
            PAYOUT_COLUMNS, where_clause, order
        );
        values.push(limit_value(filter.limit));

        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare payout query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), PayoutRow::from_row)
            .context("Failed to query payouts")?;
        let mut payouts = Vec::new();
        for row in rows {
            payouts.push(row.context("Failed to read payout row")?.into_payout()?);
        }
        Ok(payouts)
    }

    pub fn update_payout(
        &self,
        id: &PayoutId,
        expected: &[PayoutStatus],
        patch: &PayoutPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin payout update")?;
        let Some(mut payout) = self.get_payout(id)? else {
            return Ok(false);
        };
        if !expected.is_empty() && !expected.contains(&payout.status) {
            return Ok(false);
        }
        patch.apply(&mut payout, now);
        self.upsert_payout(&payout)?;
        tx.commit().context("Failed to commit payout update")?;
        Ok(true)
    }

    // ── Owners ────────────────────────────────────────────────────────

    pub fn upsert_owner(&self, owner: &Owner) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO owners (id, email, first_name, last_name) VALUES (?1, ?2, ?3, ?4)",
                params![owner.id.as_str(), owner.email, owner.first_name, owner.last_name],
            )
            .context("Failed to write owner")?;
        Ok(())
    }

    pub fn get_owner(&self, id: &OwnerId) -> Result<Option<Owner>> {
        self.conn
            .query_row(
                "SELECT id, email, first_name, last_name FROM owners WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(Owner {
                        id: OwnerId::new(row.get::<_, String>(0)?),
                        email: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query owner")
    }

    // ── Audit trail & run reports ─────────────────────────────────────

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        self.conn
            .execute(
                "INSERT INTO audit_trail (id, type, claim_id, payout_id, timestamp, entry)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    entry.kind().as_str(),
                    entry.claim_id.as_ref().map(|id| id.as_str().to_string()),
                    entry.payout_id.as_ref().map(|id| id.as_str().to_string()),
                    ts(entry.timestamp),
                    json,
                ],
            )
            .context("Failed to append audit entry")?;
        Ok(())
    }

    pub fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(ref id) = filter.claim_id {
            clauses.push("claim_id = ?");
            values.push(Value::Text(id.as_str().to_string()));
        }
        if let Some(ref id) = filter.payout_id {
            clauses.push("payout_id = ?");
            values.push(Value::Text(id.as_str().to_string()));
        }
        if let Some(kind) = filter.kind {
            clauses.push("type = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        // LIMIT -1 means unbounded in SQLite.
        let limit = if filter.limit == 0 {
            Value::Integer(-1)
        } else {
            limit_value(filter.limit)
        };
        values.push(limit);
        let sql = format!(
            "SELECT entry FROM audit_trail {} ORDER BY seq LIMIT ?",
            where_clause
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare audit query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .context("Failed to query audit trail")?;
        let mut entries = Vec::new();
        for row in rows {
            let json = row.context("Failed to read audit row")?;
            entries.push(serde_json::from_str(&json).context("Failed to parse audit entry")?);
        }
        Ok(entries)
    }

    pub fn save_run_report(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string(report).context("Failed to serialize run report")?;
        self.conn
            .execute(
                "INSERT INTO reconciliation_runs (run_id, started_at, report) VALUES (?1, ?2, ?3)",
                params![report.run_id.to_string(), ts(report.started_at), json],
            )
            .context("Failed to insert run report")?;
        Ok(())
    }

    pub fn recent_run_reports(&self, limit: usize) -> Result<Vec<RunReport>> {
        let mut stmt = self
            .conn
            .prepare("SELECT report FROM reconciliation_runs ORDER BY seq DESC LIMIT ?1")
            .context("Failed to prepare run report query")?;
        let rows = stmt
            .query_map(params_from_iter([limit_value(limit)].iter()), |row| {
                row.get::<_, String>(0)
            })
            .context("Failed to query run reports")?;
        let mut reports = Vec::new();
        for row in rows {
            let json = row.context("Failed to read run report row")?;
            reports.push(serde_json::from_str(&json).context("Failed to parse run report")?);
        }
        Ok(reports)
    }
}

/// `EntityStore` over SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(db: DbHandle, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let db = ClaimsDb::new(path)?;
        Ok(Self::new(DbHandle::new(db), clock))
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn claims(&self, filter: ClaimFilter) -> Result<Vec<Claim>> {
        self.db.call(move |db| db.query_claims(&filter)).await
    }

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>> {
        let id = id.clone();
        self.db.call(move |db| db.get_claim(&id)).await
    }

    async fn update_claim(
        &self,
        id: &ClaimId,
        expected: &[ClaimStatus],
        patch: ClaimPatch,
    ) -> Result<bool> {
        let id = id.clone();
        let expected = expected.to_vec();
        let now = self.clock.now();
        self.db
            .call(move |db| db.update_claim(&id, &expected, &patch, now))
            .await
    }

    async fn clear_review_locks(
        &self,
        ids: &[ClaimId],
        locked_before: DateTime<Utc>,
    ) -> Result<Vec<ClaimId>> {
        let ids = ids.to_vec();
        self.db
            .call(move |db| db.clear_review_locks(&ids, locked_before))
            .await
    }

    async fn payouts(&self, filter: PayoutFilter) -> Result<Vec<Payout>> {
        self.db.call(move |db| db.query_payouts(&filter)).await
    }

    async fn get_payout(&self, id: &PayoutId) -> Result<Option<Payout>> {
        let id = id.clone();
        self.db.call(move |db| db.get_payout(&id)).await
    }

    async fn update_payout(
        &self,
        id: &PayoutId,
        expected: &[PayoutStatus],
        patch: PayoutPatch,
    ) -> Result<bool> {
        let id = id.clone();
        let expected = expected.to_vec();
        let now = self.clock.now();
        self.db
            .call(move |db| db.update_payout(&id, &expected, &patch, now))
            .await
    }

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<Owner>> {
        let id = id.clone();
        self.db.call(move |db| db.get_owner(&id)).await
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.db.call(move |db| db.append_audit(&entry)).await
    }

    async fn audit_entries(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        self.db.call(move |db| db.audit_entries(&filter)).await
    }

    async fn save_run_report(&self, report: &RunReport) -> Result<()> {
        let report = report.clone();
        self.db.call(move |db| db.save_run_report(&report)).await
    }

    async fn recent_run_reports(&self, limit: usize) -> Result<Vec<RunReport>> {
        self.db.call(move |db| db.recent_run_reports(limit)).await
    }
}
