//! Component contracts
//!
//! Flat trait seams between the runner and each pipeline stage. Business
//! logic above these traits never references a concrete backend; swapping
//! the mailbox, blob store, or audit database touches only the
//! implementation modules.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use adflow_common::Result;

use crate::model::{
    IngestionEvent, IngestionPayload, IngestionStatus, ParseResult, SourceKind, ValidationResult,
};

/// Metadata attached to a raw artifact when it is persisted.
#[derive(Debug, Clone)]
pub struct StorageMetadata {
    pub account_id: String,
    pub filename: String,
    pub sender: String,
}

/// Source-specific retrieval.
///
/// `receive` must use a non-destructive peek so a downstream failure leaves
/// the source item untouched for retry; `acknowledge` marks it consumed and
/// is only called after the downstream pipeline has committed — or when the
/// adapter itself reported a structural error on that exact item, in which
/// case the runner acknowledges anyway to break poison-message loops.
#[async_trait]
pub trait SourceAdapter: Send {
    fn source(&self) -> SourceKind;

    /// Fetch the next pending item, or `None` when nothing is pending.
    ///
    /// Extraction problems (zero or multiple report attachments, connection
    /// failure) surface as `IngestError::Adapter`, never silently.
    async fn receive(&mut self) -> Result<Option<IngestionPayload>>;

    /// Mark the item from the last `receive` call as consumed.
    async fn acknowledge(&mut self, ingestion_id: Option<Uuid>) -> Result<()>;
}

/// Sender authorization and structural soundness checks.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Run all checks without short-circuiting and return the accumulated
    /// errors. The fingerprint is computed even when validation fails.
    async fn validate(&self, payload: &IngestionPayload) -> ValidationResult;

    /// Whether this artifact has been processed before.
    async fn check_duplicate(&self, account_id: &str, fingerprint: &str) -> Result<bool>;
}

/// Opaque blob put/get/delete for raw artifacts.
#[async_trait]
pub trait RawStorage: Send + Sync {
    /// Persist a raw file and return its opaque identifier.
    async fn put(&self, content: &[u8], metadata: &StorageMetadata) -> Result<String>;

    /// Retrieve a raw file. Fails with `IngestError::Storage` if absent.
    async fn get(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Delete a raw file. Returns `false` when it did not exist. The
    /// retention sweep that drives deletion is an external scheduler.
    async fn delete(&self, file_id: &str) -> Result<bool>;
}

/// Report parsing with partial-failure tolerance.
#[async_trait]
pub trait ReportParser: Send + Sync {
    /// Parse file content into normalized rows. Row-level failures are
    /// dropped and counted in the result; file-level failures (missing
    /// required header, undecodable content) are `IngestError::Parse`.
    async fn parse(&self, content: &[u8]) -> Result<ParseResult>;

    /// Report-window fingerprint for resubmission detection, distinct from
    /// the identity fingerprint computed by the validator.
    fn compute_fingerprint(
        &self,
        sender: &str,
        filename: &str,
        date_range: (NaiveDate, NaiveDate),
    ) -> String;
}

/// Auditable event log; the single writer of ingestion status.
///
/// Persistence failures on create/update are logged and swallowed by the
/// implementations — observability failures must not become correctness
/// failures. Transition violations always propagate.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Create a new event at status RECEIVED.
    async fn create_event(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        metadata: JsonValue,
    ) -> Result<IngestionEvent>;

    /// Drive an event to a new status.
    ///
    /// Validates the transition against the state machine first and returns
    /// `IngestError::StateTransition` on violation with stored state
    /// untouched. On success the event gets a fresh `processed_at`.
    async fn update_status(
        &self,
        ingestion_id: Uuid,
        status: IngestionStatus,
        failure_reason: Option<&str>,
        metadata_updates: Option<JsonValue>,
    ) -> Result<()>;

    async fn get_event(&self, ingestion_id: Uuid) -> Result<Option<IngestionEvent>>;

    /// Record a duplicate submission directly at the terminal
    /// DUPLICATE_IGNORED status. Creation is not a transition, so this does
    /// not go through `update_status`.
    async fn log_duplicate(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        fingerprint: &str,
        metadata: JsonValue,
    ) -> Result<IngestionEvent>;

    /// Create an event and immediately drive it to FAILED with the supplied
    /// reason. Used on the validation-rejection path.
    async fn log_rejected(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        reason: &str,
        metadata: JsonValue,
    ) -> Result<IngestionEvent> {
        let event = self.create_event(account_id, source, metadata).await?;
        // FAILED is only reachable through PROCESSING.
        self.update_status(event.ingestion_id, IngestionStatus::Processing, None, None)
            .await?;
        self.update_status(
            event.ingestion_id,
            IngestionStatus::Failed,
            Some(reason),
            None,
        )
        .await?;
        Ok(event)
    }
}
