//! Configuration management
//!
//! One explicit `Config` object built at process start and injected into
//! each component constructor. Nothing reads the environment after startup.

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Default mailbox folder to monitor.
pub const DEFAULT_IMAP_FOLDER: &str = "INBOX";

/// Default network timeout for mailbox, storage, and alert calls, in seconds.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;

/// Default attachment extension expected on report files.
pub const DEFAULT_REPORT_EXTENSION: &str = "csv";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/adflow";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default trusted sender domain. Exact suffix match, never wildcarded
/// further, so look-alike domains cannot spoof their way in.
pub const DEFAULT_TRUSTED_DOMAIN: &str = "amazon.com";

/// Default exact sender allow-list.
pub const DEFAULT_SENDER_ALLOWLIST: &[&str] = &[
    "no-reply@amazon.com",
    "advertising-reports@amazon.com",
    "seller-reports@amazon.com",
    "reports@amazon.com",
    "noreply@amazon.com",
];

/// Default iteration ceiling for one `process_all` pass.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Default pause between items, in milliseconds.
pub const DEFAULT_PAUSE_MS: u64 = 500;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub imap: ImapConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub alert: AlertConfig,
    pub validation: ValidationConfig,
    pub runner: RunnerConfig,
}

/// Mailbox connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub folder: String,
    /// Expected attachment extension for report files.
    pub report_extension: String,
    pub timeout_secs: u64,
}

/// Raw storage (S3-compatible) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub timeout_secs: u64,
}

/// Event log database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Alert dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Outbound webhook for CRITICAL/HIGH alerts. `None` disables external
    /// dispatch; alerts are then logged only.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

/// Sender authorization and account identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub trusted_domain: String,
    pub sender_allowlist: Vec<String>,
    /// Bootstrap account identity for the static resolver.
    pub default_account: String,
}

/// Batch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Hard ceiling on `process_one` invocations per `process_all` pass.
    pub max_iterations: usize,
    /// Pause between items, to avoid hammering the source.
    pub pause_ms: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            imap: ImapConfig {
                host: std::env::var("IMAP_HOST").unwrap_or_default(),
                port: std::env::var("IMAP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_IMAP_PORT),
                user: std::env::var("IMAP_USER").unwrap_or_default(),
                password: std::env::var("IMAP_PASSWORD").unwrap_or_default(),
                folder: std::env::var("IMAP_FOLDER")
                    .unwrap_or_else(|_| DEFAULT_IMAP_FOLDER.to_string()),
                report_extension: std::env::var("INGEST_REPORT_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_REPORT_EXTENSION.to_string()),
                timeout_secs: std::env::var("IMAP_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            },
            storage: StorageConfig {
                endpoint: std::env::var("S3_ENDPOINT").ok(),
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                bucket: std::env::var("S3_BUCKET")
                    .unwrap_or_else(|_| "ingestion-raw".to_string()),
                access_key: std::env::var("S3_ACCESS_KEY")
                    .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                    .unwrap_or_default(),
                secret_key: std::env::var("S3_SECRET_KEY")
                    .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                    .unwrap_or_default(),
                path_style: std::env::var("S3_PATH_STYLE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(false),
                timeout_secs: std::env::var("S3_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            alert: AlertConfig {
                webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
                timeout_secs: std::env::var("ALERT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            },
            validation: ValidationConfig {
                trusted_domain: std::env::var("INGEST_TRUSTED_DOMAIN")
                    .unwrap_or_else(|_| DEFAULT_TRUSTED_DOMAIN.to_string()),
                sender_allowlist: std::env::var("INGEST_SENDER_ALLOWLIST")
                    .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).collect())
                    .unwrap_or_else(|_| {
                        DEFAULT_SENDER_ALLOWLIST.iter().map(|s| s.to_string()).collect()
                    }),
                default_account: std::env::var("INGEST_DEFAULT_ACCOUNT")
                    .unwrap_or_else(|_| "default".to_string()),
            },
            runner: RunnerConfig {
                max_iterations: std::env::var("INGEST_MAX_ITERATIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_ITERATIONS),
                pause_ms: std::env::var("INGEST_PAUSE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PAUSE_MS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.imap.host.is_empty() || self.imap.user.is_empty() || self.imap.password.is_empty() {
            anyhow::bail!(
                "Mailbox credentials not configured. \
                 Set IMAP_HOST, IMAP_USER, IMAP_PASSWORD environment variables."
            );
        }

        if self.imap.port == 0 {
            anyhow::bail!("IMAP port must be greater than 0");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("Storage bucket cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.validation.trusted_domain.is_empty() {
            anyhow::bail!("Trusted sender domain cannot be empty");
        }

        if self.runner.max_iterations == 0 {
            anyhow::bail!("Runner max_iterations must be greater than 0");
        }

        Ok(())
    }
}
