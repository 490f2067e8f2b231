//! Pipeline runner
//!
//! Drives one payload through receive, validate, store, log, parse, and
//! acknowledge, with every stage boundary mapped to an explicit outcome.
//! The ordering invariant lives here: a source item is acknowledged only
//! after its raw artifact and audit trail are committed, so a crash at any
//! point leaves the item unread and retryable. The single exception is a
//! structural error from the adapter itself, which is acknowledged anyway
//! so one malformed message cannot wedge the whole mailbox.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use adflow_common::{IngestError, Result};

use crate::alert::Alerter;
use crate::config::RunnerConfig;
use crate::contract::{EventLog, RawStorage, ReportParser, SourceAdapter, StorageMetadata, Validator};
use crate::model::{IngestionPayload, IngestionStatus};

/// What a single `process_one` pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Payload fully ingested.
    Received,
    /// Validation rejected the payload; it was consumed, not retried.
    Rejected,
    /// Duplicate submission recorded and skipped.
    DuplicateIgnored,
    /// Parsed data quality was below the floor; held for manual review.
    Quarantined,
    /// The source adapter failed to produce a usable payload.
    AdapterError,
    /// Raw persistence failed; the source item was left unread.
    StorageError,
    /// Unexpected failure outside the per-stage handling.
    SystemError,
    /// Nothing pending at the source.
    NoEmails,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Action::Received => "RECEIVED",
            Action::Rejected => "REJECTED",
            Action::DuplicateIgnored => "DUPLICATE_IGNORED",
            Action::Quarantined => "QUARANTINED",
            Action::AdapterError => "ADAPTER_ERROR",
            Action::StorageError => "STORAGE_ERROR",
            Action::SystemError => "SYSTEM_ERROR",
            Action::NoEmails => "NO_EMAILS",
        };
        write!(f, "{}", tag)
    }
}

/// Structured result of one `process_one` pass.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub action: Action,
    pub ingestion_id: Option<Uuid>,
    pub error: Option<String>,
}

impl Outcome {
    fn ok(action: Action, ingestion_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            action,
            ingestion_id,
            error: None,
        }
    }

    fn failed(action: Action, ingestion_id: Option<Uuid>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action,
            ingestion_id,
            error: Some(error.into()),
        }
    }
}

pub struct Runner {
    adapter: Box<dyn SourceAdapter>,
    validator: Arc<dyn Validator>,
    storage: Arc<dyn RawStorage>,
    parser: Arc<dyn ReportParser>,
    event_log: Arc<dyn EventLog>,
    alerter: Arc<dyn Alerter>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        adapter: Box<dyn SourceAdapter>,
        validator: Arc<dyn Validator>,
        storage: Arc<dyn RawStorage>,
        parser: Arc<dyn ReportParser>,
        event_log: Arc<dyn EventLog>,
        alerter: Arc<dyn Alerter>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            adapter,
            validator,
            storage,
            parser,
            event_log,
            alerter,
            config,
        }
    }

    /// Process the next pending item end to end.
    ///
    /// Never returns `Err`: every failure is folded into the outcome, and
    /// anything that escapes the per-stage handling becomes SYSTEM_ERROR
    /// with a CRITICAL alert.
    pub async fn process_one(&mut self) -> Outcome {
        match self.try_process_one().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "unhandled pipeline failure");
                self.alerter
                    .send_critical(&format!("Ingestion pipeline failure: {}", e))
                    .await;
                Outcome::failed(Action::SystemError, None, e.to_string())
            },
        }
    }

    async fn try_process_one(&mut self) -> Result<Outcome> {
        let source = self.adapter.source();

        let payload = match self.adapter.receive().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!(source = %source, "no pending items");
                // Nothing was ingested, so the flag stays down; the empty
                // mailbox itself is not an error.
                return Ok(Outcome {
                    success: false,
                    action: Action::NoEmails,
                    ingestion_id: None,
                    error: None,
                });
            },
            Err(e) => return Ok(self.handle_adapter_error(e).await),
        };

        info!(
            account_id = %payload.account_id,
            sender = %payload.sender,
            filename = %payload.filename,
            bytes = payload.content.len(),
            "payload received"
        );

        let validation = self.validator.validate(&payload).await;
        if !validation.valid {
            return Ok(self.handle_rejection(&payload, &validation.errors, &validation.fingerprint).await);
        }

        let is_duplicate = match self
            .validator
            .check_duplicate(&payload.account_id, &validation.fingerprint)
            .await
        {
            Ok(dup) => dup,
            Err(e) => {
                // Fail open: a broken duplicate check must not block ingestion.
                warn!(error = %e, "duplicate check failed, proceeding");
                false
            },
        };
        if is_duplicate {
            return Ok(self.handle_duplicate(&payload, &validation.fingerprint).await);
        }

        let raw_file_path = match self.store_raw(&payload).await {
            Ok(path) => path,
            Err(e) => {
                // The item stays unread at the source; next pass retries it.
                self.alerter
                    .send_ingestion_failed(
                        Some(&payload.account_id),
                        &e.to_string(),
                        Some(&payload.filename),
                    )
                    .await;
                return Ok(Outcome::failed(Action::StorageError, None, e.to_string()));
            },
        };

        let event = self
            .event_log
            .create_event(
                Some(&payload.account_id),
                source,
                json!({
                    "fingerprint": validation.fingerprint,
                    "raw_file_path": raw_file_path,
                    "filename": payload.filename,
                    "sender": payload.sender,
                    "subject": payload.subject,
                }),
            )
            .await?;
        let ingestion_id = event.ingestion_id;

        self.event_log
            .update_status(ingestion_id, IngestionStatus::Processing, None, None)
            .await?;

        let parsed = match self.parser.parse(&payload.content).await {
            Ok(result) if result.should_quarantine() => {
                let reason = format!(
                    "drop rate {:.4} exceeds threshold ({} of {} rows dropped)",
                    result.drop_rate(),
                    result.dropped_rows,
                    result.total_rows
                );
                return Ok(self
                    .quarantine(ingestion_id, &payload, &reason, Some(&result.warnings))
                    .await?);
            },
            Ok(result) => result,
            Err(e) if e.should_quarantine() => {
                return Ok(self.quarantine(ingestion_id, &payload, &e.to_string(), None).await?);
            },
            Err(e) => {
                self.event_log
                    .update_status(
                        ingestion_id,
                        IngestionStatus::Failed,
                        Some(&e.to_string()),
                        None,
                    )
                    .await?;
                self.alerter
                    .send_ingestion_failed(
                        Some(&payload.account_id),
                        &e.to_string(),
                        Some(&payload.filename),
                    )
                    .await;
                self.acknowledge_quietly(Some(ingestion_id)).await;
                return Ok(Outcome::failed(
                    Action::SystemError,
                    Some(ingestion_id),
                    e.to_string(),
                ));
            },
        };

        // Commit point: everything downstream of the source has succeeded.
        if let Err(e) = self.adapter.acknowledge(Some(ingestion_id)).await {
            let reason = format!("acknowledge failed: {}", e);
            self.event_log
                .update_status(ingestion_id, IngestionStatus::Failed, Some(&reason), None)
                .await?;
            self.alerter
                .send_ingestion_failed(Some(&payload.account_id), &reason, Some(&payload.filename))
                .await;
            return Ok(Outcome::failed(Action::AdapterError, Some(ingestion_id), reason));
        }

        self.event_log
            .update_status(
                ingestion_id,
                IngestionStatus::Completed,
                None,
                Some(json!({
                    "rows": parsed.rows.len(),
                    "total_rows": parsed.total_rows,
                    "dropped_rows": parsed.dropped_rows,
                })),
            )
            .await?;

        info!(
            %ingestion_id,
            account_id = %payload.account_id,
            rows = parsed.rows.len(),
            dropped = parsed.dropped_rows,
            "ingestion completed"
        );
        Ok(Outcome::ok(Action::Received, Some(ingestion_id)))
    }

    /// Run bounded passes until the source drains or the ceiling is hit.
    pub async fn process_all(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for iteration in 0..self.config.max_iterations {
            if iteration > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pause_ms)).await;
            }

            let outcome = self.process_one().await;
            let drained = outcome.action == Action::NoEmails;
            if drained {
                break;
            }
            outcomes.push(outcome);
        }

        if outcomes.len() == self.config.max_iterations {
            warn!(
                ceiling = self.config.max_iterations,
                "iteration ceiling reached with items still pending"
            );
        }

        info!(
            processed = outcomes.len(),
            succeeded = outcomes.iter().filter(|o| o.success).count(),
            "batch pass finished"
        );
        outcomes
    }

    /// Structural adapter errors are acknowledged anyway: the exact item
    /// that broke extraction would otherwise be re-fetched forever.
    async fn handle_adapter_error(&mut self, e: IngestError) -> Outcome {
        warn!(error = %e, "adapter error");
        self.acknowledge_quietly(None).await;
        self.alerter
            .send_alert(
                crate::alert::AlertSeverity::High,
                &format!("Source adapter error: {}", e),
                None,
            )
            .await;
        Outcome::failed(Action::AdapterError, None, e.to_string())
    }

    /// Rejections are consumed, not retried: the sender is not going to
    /// become trusted on a second read.
    async fn handle_rejection(
        &mut self,
        payload: &IngestionPayload,
        errors: &[String],
        fingerprint: &str,
    ) -> Outcome {
        let reason = errors.join("; ");
        warn!(
            account_id = %payload.account_id,
            sender = %payload.sender,
            reason = %reason,
            "payload rejected"
        );

        let ingestion_id = match self
            .event_log
            .log_rejected(
                Some(&payload.account_id),
                payload.source,
                &reason,
                json!({
                    "fingerprint": fingerprint,
                    "filename": payload.filename,
                    "sender": payload.sender,
                }),
            )
            .await
        {
            Ok(event) => Some(event.ingestion_id),
            Err(e) => {
                warn!(error = %e, "failed to record rejection");
                None
            },
        };

        self.alerter
            .send_validation_rejected(Some(&payload.account_id), &payload.sender, errors)
            .await;
        self.acknowledge_quietly(ingestion_id).await;
        Outcome::failed(Action::Rejected, ingestion_id, reason)
    }

    async fn handle_duplicate(&mut self, payload: &IngestionPayload, fingerprint: &str) -> Outcome {
        info!(
            account_id = %payload.account_id,
            fingerprint = %fingerprint,
            "duplicate submission ignored"
        );

        let ingestion_id = match self
            .event_log
            .log_duplicate(
                Some(&payload.account_id),
                payload.source,
                fingerprint,
                json!({
                    "filename": payload.filename,
                    "sender": payload.sender,
                }),
            )
            .await
        {
            Ok(event) => Some(event.ingestion_id),
            Err(e) => {
                warn!(error = %e, "failed to record duplicate");
                None
            },
        };

        self.acknowledge_quietly(ingestion_id).await;
        Outcome::ok(Action::DuplicateIgnored, ingestion_id)
    }

    async fn quarantine(
        &mut self,
        ingestion_id: Uuid,
        payload: &IngestionPayload,
        reason: &str,
        warnings: Option<&[String]>,
    ) -> Result<Outcome> {
        let metadata = warnings.map(|w| json!({ "warnings": w }));
        self.event_log
            .update_status(
                ingestion_id,
                IngestionStatus::Quarantine,
                Some(reason),
                metadata,
            )
            .await?;
        self.alerter
            .send_ingestion_failed(Some(&payload.account_id), reason, Some(&payload.filename))
            .await;
        // The artifact is stored and the event holds the review pointer, so
        // the source item is consumed.
        self.acknowledge_quietly(Some(ingestion_id)).await;
        warn!(%ingestion_id, reason = %reason, "payload quarantined");
        Ok(Outcome::failed(Action::Quarantined, Some(ingestion_id), reason))
    }

    async fn store_raw(&self, payload: &IngestionPayload) -> Result<String> {
        let metadata = StorageMetadata {
            account_id: payload.account_id.clone(),
            filename: payload.filename.clone(),
            sender: payload.sender.clone(),
        };
        self.storage.put(&payload.content, &metadata).await
    }

    async fn acknowledge_quietly(&mut self, ingestion_id: Option<Uuid>) {
        if let Err(e) = self.adapter.acknowledge(ingestion_id).await {
            warn!(?ingestion_id, error = %e, "acknowledge failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tags() {
        assert_eq!(Action::Received.to_string(), "RECEIVED");
        assert_eq!(Action::Rejected.to_string(), "REJECTED");
        assert_eq!(Action::DuplicateIgnored.to_string(), "DUPLICATE_IGNORED");
        assert_eq!(Action::Quarantined.to_string(), "QUARANTINED");
        assert_eq!(Action::AdapterError.to_string(), "ADAPTER_ERROR");
        assert_eq!(Action::StorageError.to_string(), "STORAGE_ERROR");
        assert_eq!(Action::SystemError.to_string(), "SYSTEM_ERROR");
        assert_eq!(Action::NoEmails.to_string(), "NO_EMAILS");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = Outcome::ok(Action::Received, None);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = Outcome::failed(Action::StorageError, None, "upload failed");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("upload failed"));
    }
}
