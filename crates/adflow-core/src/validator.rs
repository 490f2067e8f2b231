//! Sender authorization and structural validation
//!
//! Two independent checks run on every payload, without short-circuiting:
//! sender authorization (trusted-domain suffix or exact allow-list) and
//! structural soundness (non-empty, text-decodable). The identity
//! fingerprint is computed for audit purposes whether or not the checks
//! pass.

use async_trait::async_trait;
use tracing::debug;

use adflow_common::{fingerprint, Result};

use crate::config::ValidationConfig;
use crate::contract::Validator;
use crate::model::{IngestionPayload, ValidationResult};

/// Maps recipient addressing to an account identity.
///
/// The planned alias format is `str-{uuid}@<ingest domain>`, carried in the
/// recipient address. That format is documented but not yet enforced;
/// phase 1 ships only the static resolver below.
pub trait AccountResolver: Send + Sync {
    fn resolve(&self, recipients: &[String]) -> Option<String>;
}

/// Bootstrap resolver pinning every payload to one configured account.
pub struct StaticAccountResolver {
    account_id: String,
}

impl StaticAccountResolver {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

impl AccountResolver for StaticAccountResolver {
    fn resolve(&self, _recipients: &[String]) -> Option<String> {
        Some(self.account_id.clone())
    }
}

/// Validates sender identity and file structure.
pub struct IdentityValidator {
    trusted_domain: String,
    allowlist: Vec<String>,
}

impl IdentityValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            trusted_domain: config.trusted_domain.to_lowercase(),
            allowlist: config
                .sender_allowlist
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Exact trusted-domain suffix match OR exact allow-list membership.
    ///
    /// Deliberately never wildcarded beyond the one trusted domain:
    /// `amazon@fake.com` must not pass because "amazon" appears in it.
    pub fn is_sender_allowed(&self, sender: &str) -> bool {
        let sender = sender.to_lowercase();
        let sender = sender.trim();

        if sender.ends_with(&format!("@{}", self.trusted_domain)) {
            return true;
        }

        self.allowlist.iter().any(|allowed| allowed == sender)
    }

    fn check_file_structure(content: &[u8]) -> Option<String> {
        if content.is_empty() {
            return Some("File is empty".to_string());
        }
        if std::str::from_utf8(content).is_err() {
            return Some("File is not valid UTF-8".to_string());
        }
        None
    }
}

#[async_trait]
impl Validator for IdentityValidator {
    async fn validate(&self, payload: &IngestionPayload) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.is_sender_allowed(&payload.sender) {
            errors.push(format!(
                "Sender not allowed: {}. Must be @{} or in allow-list.",
                payload.sender, self.trusted_domain
            ));
        }

        if let Some(file_error) = Self::check_file_structure(&payload.content) {
            errors.push(file_error);
        }

        // Always computed, for the audit trail, even on rejection.
        let fp = fingerprint::identity_fingerprint(
            &payload.sender,
            payload.subject.as_deref().unwrap_or(""),
            &payload.filename,
            payload.content.len(),
        );

        ValidationResult {
            valid: errors.is_empty(),
            account_id: Some(payload.account_id.clone()),
            errors,
            is_duplicate: false,
            fingerprint: fp,
        }
    }

    /// Phase-gated stub: fingerprints are stored but uniqueness is not yet
    /// enforced. Logged so dormant call sites stay visible in traces.
    async fn check_duplicate(&self, account_id: &str, fingerprint: &str) -> Result<bool> {
        debug!(
            account_id = %account_id,
            fingerprint = %fingerprint,
            "duplicate check requested (not enforced yet)"
        );
        Ok(false)
    }
}
