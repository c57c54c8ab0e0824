//! Core Engine configuration, loaded once at startup

use std::env;
use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};

/// Full Core configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub node_env: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Base directory for the durable stores
    pub database_url: PathBuf,
    pub database_migration_lock_timeout_ms: u64,
    pub executor_url: String,
    /// Shared token presented to the Executor
    pub openclaw_shared_token: String,
    /// Bearer token required on `/v1/*` service routes
    pub service_shared_token: String,
    pub permission_manifest_version: String,
    pub command_queue_file: String,
    pub fallback_queue_file: String,
    pub audit_log_file: String,
    pub subscriptions_file: String,
    pub dispatch_worker_interval_ms: u64,
    pub dispatch_worker_max_attempts: u32,
    pub admin_username: String,
    pub admin_password: String,
    /// Webhook HMAC secrets per provider family
    pub booking_webhook_secret: String,
    pub messaging_webhook_secret: String,
    pub payment_webhook_secret: String,
}

fn var(name: &str) -> CoreResult<String> {
    env::var(name).map_err(|_| CoreError::Validation(format!("{} is not set", name)))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_num<T: std::str::FromStr>(name: &str, value: String) -> CoreResult<T> {
    value
        .parse()
        .map_err(|_| CoreError::Validation(format!("{} must be a number", name)))
}

impl CoreConfig {
    /// Load from the environment; missing required values are fatal
    pub fn from_env() -> CoreResult<Self> {
        Ok(Self {
            node_env: var_or("NODE_ENV", "development"),
            host: var_or("HOST", "127.0.0.1"),
            port: parse_num("PORT", var_or("PORT", "4300"))?,
            log_level: var_or("LOG_LEVEL", "info"),
            database_url: PathBuf::from(var_or("DATABASE_URL", "./aro-core-data")),
            database_migration_lock_timeout_ms: parse_num(
                "DATABASE_MIGRATION_LOCK_TIMEOUT",
                var_or("DATABASE_MIGRATION_LOCK_TIMEOUT", "10000"),
            )?,
            executor_url: var("OPENCLAW_EXECUTOR_URL")?,
            openclaw_shared_token: var("OPENCLAW_SHARED_TOKEN")?,
            service_shared_token: var("CORE_SERVICE_SHARED_TOKEN")?,
            permission_manifest_version: var("OPENCLAW_PERMISSION_MANIFEST_VERSION")?,
            command_queue_file: var_or("CORE_COMMAND_QUEUE_FILE", "./core-command-queue.json"),
            fallback_queue_file: var_or("CORE_FALLBACK_QUEUE_FILE", "./core-fallback-queue.json"),
            audit_log_file: var_or("CORE_AUDIT_LOG_FILE", "./core-audit-log.json"),
            subscriptions_file: var_or("CORE_SUBSCRIPTIONS_FILE", "./core-subscriptions.json"),
            dispatch_worker_interval_ms: parse_num(
                "CORE_DISPATCH_WORKER_INTERVAL_MS",
                var_or("CORE_DISPATCH_WORKER_INTERVAL_MS", "5000"),
            )?,
            dispatch_worker_max_attempts: parse_num(
                "CORE_DISPATCH_WORKER_MAX_ATTEMPTS",
                var_or("CORE_DISPATCH_WORKER_MAX_ATTEMPTS", "3"),
            )?,
            admin_username: var_or("CORE_ADMIN_USERNAME", "admin"),
            admin_password: var("CORE_ADMIN_PASSWORD")?,
            booking_webhook_secret: var_or("CORE_BOOKING_WEBHOOK_SECRET", ""),
            messaging_webhook_secret: var_or("CORE_MESSAGING_WEBHOOK_SECRET", ""),
            payment_webhook_secret: var_or("CORE_PAYMENT_WEBHOOK_SECRET", ""),
        })
    }

    /// Paths for the sled-backed stores under the database directory
    pub fn state_db_path(&self) -> PathBuf {
        self.database_url.join("state")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.database_url.join("events")
    }

    pub fn idempotency_db_path(&self) -> PathBuf {
        self.database_url.join("idempotency")
    }
}
