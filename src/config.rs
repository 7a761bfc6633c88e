//! Configuration for claimsync, read from `claimsync.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Secrets are normally supplied through the
//! environment (or a `.env` file) rather than written into the file.
//!
//! # Configuration File Format
//!
//! ```toml
//! [schedule]
//! interval_minutes = 15
//! pass_deadline_secs = 540
//!
//! [thresholds]
//! lock_ttl_minutes = 10
//! stale_settling_minutes = 15
//! orphan_settling_minutes = 30
//! max_retries = 3
//! summary_mismatch_threshold = 10
//!
//! [limits]
//! mismatch_batch = 500
//! retry_batch = 100
//!
//! [payments]
//! api_base = "https://api.stripe.com"
//! timeout_secs = 30
//!
//! [notifications]
//! admin_email = "claims-ops@example.com"
//!
//! [operators.tokens]
//! alice = "change-me"
//!
//! [logging]
//! format = "json"
//!
//! [server]
//! port = 8780
//!
//! [database]
//! path = ".claimsync/claimsync.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::reconcile::ReconcilerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "claimsync.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    /// Minutes between scheduled reconciliation passes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Overall deadline for one pass
    #[serde(default = "default_pass_deadline_secs")]
    pub pass_deadline_secs: u64,
    /// Run a pass immediately when the scheduler starts
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

fn default_interval_minutes() -> u64 {
    15
}

fn default_pass_deadline_secs() -> u64 {
    540
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            pass_deadline_secs: default_pass_deadline_secs(),
            run_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsSection {
    #[serde(default = "default_lock_ttl_minutes")]
    pub lock_ttl_minutes: i64,
    #[serde(default = "default_stale_settling_minutes")]
    pub stale_settling_minutes: i64,
    #[serde(default = "default_orphan_settling_minutes")]
    pub orphan_settling_minutes: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// More corrections than this in one pass triggers a summary alert
    #[serde(default = "default_summary_mismatch_threshold")]
    pub summary_mismatch_threshold: u32,
}

fn default_lock_ttl_minutes() -> i64 {
    10
}

fn default_stale_settling_minutes() -> i64 {
    15
}

fn default_orphan_settling_minutes() -> i64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_summary_mismatch_threshold() -> u32 {
    10
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            lock_ttl_minutes: default_lock_ttl_minutes(),
            stale_settling_minutes: default_stale_settling_minutes(),
            orphan_settling_minutes: default_orphan_settling_minutes(),
            max_retries: default_max_retries(),
            summary_mismatch_threshold: default_summary_mismatch_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_mismatch_batch")]
    pub mismatch_batch: usize,
    #[serde(default = "default_retry_batch")]
    pub retry_batch: usize,
}

fn default_mismatch_batch() -> usize {
    500
}

fn default_retry_batch() -> usize {
    100
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            mismatch_batch: default_mismatch_batch(),
            retry_batch: default_retry_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsSection {
    #[serde(default = "default_payments_api_base")]
    pub api_base: String,
    #[serde(default = "default_payments_path")]
    pub payout_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_payments_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_payments_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_payments_path() -> String {
    "/v1/refunds".to_string()
}

fn default_payments_timeout_secs() -> u64 {
    30
}

impl Default for PaymentsSection {
    fn default() -> Self {
        Self {
            api_base: default_payments_api_base(),
            payout_path: default_payments_path(),
            api_key: None,
            timeout_secs: default_payments_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendgrid_api_key: Option<String>,
    #[serde(default = "default_sendgrid_api_base")]
    pub sendgrid_api_base: String,
    /// Recipient of escalation emails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_email: Option<String>,
    #[serde(default = "default_from_email")]
    pub from_email: String,
}

fn default_sendgrid_api_base() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_from_email() -> String {
    "alerts@claimsync.local".to_string()
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            sendgrid_api_key: None,
            sendgrid_api_base: default_sendgrid_api_base(),
            admin_email: None,
            from_email: default_from_email(),
        }
    }
}

/// Operator id -> bearer token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorsSection {
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// `RUST_LOG`-style directive used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Also write daily-rolling log files here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin. Only for local dashboards.
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8780
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".claimsync/claimsync.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Root of `claimsync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsyncConfig {
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub thresholds: ThresholdsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub payments: PaymentsSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub operators: OperatorsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

impl ClaimsyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file, then layer environment overrides on top.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "<root>".to_string(),
            message: e.to_string(),
        })
    }

    /// Environment variables override file values. The lookup is injected so
    /// tests never touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("CLAIMSYNC_PAYMENT_API_KEY") {
            self.payments.api_key = Some(key);
        }
        if let Some(url) = lookup("CLAIMSYNC_SLACK_WEBHOOK_URL") {
            self.notifications.slack_webhook_url = Some(url);
        }
        if let Some(key) = lookup("CLAIMSYNC_SENDGRID_API_KEY") {
            self.notifications.sendgrid_api_key = Some(key);
        }
        if let Some(email) = lookup("CLAIMSYNC_ADMIN_EMAIL") {
            self.notifications.admin_email = Some(email);
        }
        if let Some(path) = lookup("CLAIMSYNC_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup("CLAIMSYNC_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CLAIMSYNC_PORT".to_string(),
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        Ok(())
    }

    /// Copy with every credential replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        const HIDDEN: &str = "<redacted>";
        let mut copy = self.clone();
        if copy.payments.api_key.is_some() {
            copy.payments.api_key = Some(HIDDEN.to_string());
        }
        if copy.notifications.slack_webhook_url.is_some() {
            copy.notifications.slack_webhook_url = Some(HIDDEN.to_string());
        }
        if copy.notifications.sendgrid_api_key.is_some() {
            copy.notifications.sendgrid_api_key = Some(HIDDEN.to_string());
        }
        for token in copy.operators.tokens.values_mut() {
            *token = HIDDEN.to_string();
        }
        copy
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            lock_ttl: chrono::Duration::minutes(self.thresholds.lock_ttl_minutes),
            stale_settling_after: chrono::Duration::minutes(self.thresholds.stale_settling_minutes),
            orphaned_settling_after: chrono::Duration::minutes(
                self.thresholds.orphan_settling_minutes,
            ),
            max_retries: self.thresholds.max_retries,
            mismatch_batch: self.limits.mismatch_batch,
            retry_batch: self.limits.retry_batch,
            pass_deadline: std::time::Duration::from_secs(self.schedule.pass_deadline_secs),
            summary_mismatch_threshold: self.thresholds.summary_mismatch_threshold,
            admin_email: self.notifications.admin_email.clone(),
        }
    }

    /// Return human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.thresholds.max_retries == 0 {
            warnings.push(
                "thresholds.max_retries is 0: every failed payout escalates without a retry"
                    .to_string(),
            );
        }
        if self.thresholds.orphan_settling_minutes <= self.thresholds.stale_settling_minutes {
            warnings.push(format!(
                "thresholds.orphan_settling_minutes ({}) should exceed stale_settling_minutes ({})",
                self.thresholds.orphan_settling_minutes, self.thresholds.stale_settling_minutes
            ));
        }
        if self.thresholds.lock_ttl_minutes <= 0 {
            warnings.push("thresholds.lock_ttl_minutes must be positive".to_string());
        }
        if self.schedule.interval_minutes == 0 {
            warnings.push("schedule.interval_minutes must be at least 1".to_string());
        }
        if self.schedule.pass_deadline_secs >= self.schedule.interval_minutes * 60 {
            warnings.push(format!(
                "schedule.pass_deadline_secs ({}) is not shorter than the interval; passes may overlap",
                self.schedule.pass_deadline_secs
            ));
        }
        if self.payments.api_key.is_none() {
            warnings.push(
                "No payment API key (CLAIMSYNC_PAYMENT_API_KEY): payout retries will fail".to_string(),
            );
        }
        if self.notifications.slack_webhook_url.is_none()
            && self.notifications.sendgrid_api_key.is_none()
        {
            warnings.push("No notification channel configured: escalations will only be logged".to_string());
        }
        if self.notifications.sendgrid_api_key.is_some() && self.notifications.admin_email.is_none() {
            warnings.push("notifications.admin_email is unset: escalation emails are skipped".to_string());
        }
        if self.server.cors_permissive && self.server.host != "127.0.0.1" {
            warnings.push(format!(
                "server.cors_permissive is on while listening on {}",
                self.server.host
            ));
        }
        if self.operators.tokens.is_empty() {
            warnings.push("No operator tokens configured: the operator API rejects every request".to_string());
        }

        warnings
    }
}
