//! Severity-tiered outbound notification
//!
//! Alert dispatch is best-effort by contract: every internal failure is
//! swallowed and logged, never propagated, because notification must not
//! be allowed to crash the pipeline.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AlertConfig;

/// Alert severity tiers.
///
/// CRITICAL and HIGH dispatch to the external channel; MEDIUM is recorded
/// for in-app visibility only and never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// System-wide failure.
    Critical,
    /// Single-account ingestion failure.
    High,
    /// Data late / informational.
    Medium,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Medium => "MEDIUM",
        };
        write!(f, "{}", s)
    }
}

/// Outbound notification sink.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Dispatch one alert. Returns whether the external channel accepted
    /// it; `false` is informational, never an error.
    async fn send_alert(
        &self,
        severity: AlertSeverity,
        message: &str,
        account_id: Option<&str>,
    ) -> bool;

    async fn send_critical(&self, message: &str) -> bool {
        self.send_alert(AlertSeverity::Critical, message, None).await
    }

    /// Uniform body for the "ingestion failed" case.
    async fn send_ingestion_failed(
        &self,
        account_id: Option<&str>,
        reason: &str,
        filename: Option<&str>,
    ) -> bool {
        let mut message = String::from("Ingestion failed");
        if let Some(name) = filename {
            message.push_str(&format!(" for file: {}", name));
        }
        message.push_str(&format!("\n\nReason: {}", reason));
        self.send_alert(AlertSeverity::High, &message, account_id).await
    }

    /// Uniform body for the "validation rejected" case.
    async fn send_validation_rejected(
        &self,
        account_id: Option<&str>,
        sender: &str,
        errors: &[String],
    ) -> bool {
        let mut message = format!("Report rejected from: {}\n\nErrors:\n", sender);
        for err in errors {
            message.push_str(&format!("- {}\n", err));
        }
        self.send_alert(AlertSeverity::High, &message, account_id).await
    }
}

/// Webhook-backed alerter for an external paging/chat channel.
pub struct WebhookAlerter {
    client: Option<reqwest::Client>,
    webhook_url: Option<String>,
}

impl WebhookAlerter {
    pub fn new(config: &AlertConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let client = match client {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "failed to build alert HTTP client; alerts disabled");
                None
            },
        };
        Self {
            client,
            webhook_url: config.webhook_url.clone(),
        }
    }

    fn format_message(severity: AlertSeverity, message: &str, account_id: Option<&str>) -> String {
        match account_id {
            Some(account) => format!("[{}] Account: {}\n\n{}", severity, account, message),
            None => format!("[{}]\n\n{}", severity, message),
        }
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn send_alert(
        &self,
        severity: AlertSeverity,
        message: &str,
        account_id: Option<&str>,
    ) -> bool {
        // MEDIUM is in-app only and must short-circuit before any network
        // attempt.
        if severity == AlertSeverity::Medium {
            info!(severity = %severity, account_id = ?account_id, "{}", message);
            return true;
        }

        let (Some(client), Some(url)) = (self.client.as_ref(), self.webhook_url.as_deref()) else {
            warn!(severity = %severity, "alert channel disabled, logging only: {}", message);
            return false;
        };

        let body = json!({
            "severity": severity.to_string(),
            "account_id": account_id,
            "text": Self::format_message(severity, message, account_id),
        });

        match client.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(severity = %severity, "alert dispatched");
                true
            },
            Ok(response) => {
                warn!(severity = %severity, status = %response.status(), "alert rejected by channel");
                false
            },
            Err(e) => {
                warn!(severity = %severity, error = %e, "alert dispatch failed");
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_alerter() -> WebhookAlerter {
        WebhookAlerter::new(&AlertConfig {
            webhook_url: None,
            timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn test_medium_short_circuits_before_dispatch() {
        // No webhook configured, yet MEDIUM succeeds: it never tries the
        // network in the first place.
        let alerter = disabled_alerter();
        assert!(alerter.send_alert(AlertSeverity::Medium, "data late", Some("acct")).await);
    }

    #[tokio::test]
    async fn test_high_without_channel_reports_false() {
        let alerter = disabled_alerter();
        assert!(!alerter.send_alert(AlertSeverity::High, "ingestion failed", None).await);
    }

    #[tokio::test]
    async fn test_convenience_bodies() {
        // The wrappers only format; delivery goes through send_alert.
        let formatted = WebhookAlerter::format_message(AlertSeverity::High, "boom", Some("acct-1"));
        assert!(formatted.starts_with("[HIGH] Account: acct-1"));
        assert!(formatted.ends_with("boom"));

        let alerter = disabled_alerter();
        assert!(!alerter.send_ingestion_failed(Some("acct-1"), "upload failed", Some("r.csv")).await);
        assert!(!alerter
            .send_validation_rejected(None, "user@gmail.com", &["Sender not allowed".to_string()])
            .await);
    }
}
