//! Full-pipeline tests over the in-memory backends.
//!
//! Each test wires a scripted source adapter into the runner with the real
//! validator and parser, then asserts the outcome, the audit trail, the
//! stored artifacts, the dispatched alerts, and whether the source item was
//! consumed.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use adflow_common::{IngestError, Result};
use adflow_core::alert::{AlertSeverity, Alerter};
use adflow_core::config::{RunnerConfig, ValidationConfig};
use adflow_core::contract::{EventLog, RawStorage, SourceAdapter, StorageMetadata, Validator};
use adflow_core::eventlog::MemoryEventLog;
use adflow_core::model::{
    IngestionEvent, IngestionPayload, IngestionStatus, SourceKind, ValidationResult,
};
use adflow_core::parser::CsvReportParser;
use adflow_core::runner::{Action, Outcome, Runner};
use adflow_core::storage::MemoryStorage;
use adflow_core::validator::IdentityValidator;

const GOOD_CSV: &str = "\
Date,Campaign Name,Ad Group Name,Customer Search Term,Impressions,Clicks,Spend,7 Day Total Sales
2025-07-01,Summer Sale,Widgets,blue widget,1200,34,12.50,104.99
2025-07-02,Summer Sale,Widgets,red widget,1431,12,3.99,0
";

// Half the rows are broken: well over the 1% drop ceiling.
const NOISY_CSV: &str = "\
Date,Campaign Name,Ad Group Name,Customer Search Term,Impressions,Clicks,Spend
2025-07-01,C,G,term,10,1,0.50
not-a-date,C,G,term,10,1,0.50
";

const HEADERLESS_CSV: &str = "\
Date,Campaign Name,Ad Group Name,Impressions,Clicks,Spend
2025-07-01,C,G,10,1,0.50
";

fn payload(sender: &str, content: &str) -> IngestionPayload {
    IngestionPayload {
        account_id: "acct-test".to_string(),
        sender: sender.to_string(),
        content: content.as_bytes().to_vec(),
        filename: "str-report.csv".to_string(),
        source: SourceKind::Email,
        received_at: Utc::now(),
        subject: Some("Search Term Report".to_string()),
    }
}

// ============================================================================
// Test doubles
// ============================================================================

/// Adapter that replays a scripted sequence of receive results and records
/// every acknowledge call.
struct ScriptedAdapter {
    queue: Mutex<VecDeque<Result<Option<IngestionPayload>>>>,
    acks: Arc<Mutex<Vec<Option<Uuid>>>>,
    fail_ack: bool,
}

impl ScriptedAdapter {
    fn new(items: Vec<Result<Option<IngestionPayload>>>) -> (Self, Arc<Mutex<Vec<Option<Uuid>>>>) {
        let acks = Arc::new(Mutex::new(Vec::new()));
        let adapter = Self {
            queue: Mutex::new(items.into()),
            acks: acks.clone(),
            fail_ack: false,
        };
        (adapter, acks)
    }

    fn with_failing_ack(mut self) -> Self {
        self.fail_ack = true;
        self
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Email
    }

    async fn receive(&mut self) -> Result<Option<IngestionPayload>> {
        self.queue.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn acknowledge(&mut self, ingestion_id: Option<Uuid>) -> Result<()> {
        if self.fail_ack {
            return Err(IngestError::Adapter("connection dropped".to_string()));
        }
        self.acks.lock().unwrap().push(ingestion_id);
        Ok(())
    }
}

/// Captures every alert instead of dispatching it.
#[derive(Default)]
struct RecordingAlerter {
    alerts: Mutex<Vec<(AlertSeverity, String)>>,
}

impl RecordingAlerter {
    fn recorded(&self) -> Vec<(AlertSeverity, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn send_alert(
        &self,
        severity: AlertSeverity,
        message: &str,
        _account_id: Option<&str>,
    ) -> bool {
        self.alerts.lock().unwrap().push((severity, message.to_string()));
        true
    }
}

/// Storage whose puts always fail.
struct BrokenStorage;

#[async_trait]
impl RawStorage for BrokenStorage {
    async fn put(&self, _content: &[u8], _metadata: &StorageMetadata) -> Result<String> {
        Err(IngestError::Storage("bucket unavailable".to_string()))
    }

    async fn get(&self, file_id: &str) -> Result<Vec<u8>> {
        Err(IngestError::Storage(format!("not found: {}", file_id)))
    }

    async fn delete(&self, _file_id: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Delegates validation to the real validator but reports every payload as
/// already ingested.
struct AlwaysDuplicate(IdentityValidator);

#[async_trait]
impl Validator for AlwaysDuplicate {
    async fn validate(&self, payload: &IngestionPayload) -> ValidationResult {
        self.0.validate(payload).await
    }

    async fn check_duplicate(&self, _account_id: &str, _fingerprint: &str) -> Result<bool> {
        Ok(true)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    runner: Runner,
    acks: Arc<Mutex<Vec<Option<Uuid>>>>,
    storage: Arc<MemoryStorage>,
    event_log: Arc<MemoryEventLog>,
    alerter: Arc<RecordingAlerter>,
}

fn validation_config() -> ValidationConfig {
    ValidationConfig {
        trusted_domain: "amazon.com".to_string(),
        sender_allowlist: vec!["no-reply@amazon.com".to_string()],
        default_account: "acct-test".to_string(),
    }
}

fn runner_config() -> RunnerConfig {
    RunnerConfig {
        max_iterations: 10,
        pause_ms: 0,
    }
}

impl Harness {
    fn new(items: Vec<Result<Option<IngestionPayload>>>) -> Self {
        let (adapter, acks) = ScriptedAdapter::new(items);
        Self::build(
            Box::new(adapter),
            acks,
            Arc::new(IdentityValidator::new(&validation_config())),
        )
    }

    fn build(
        adapter: Box<dyn SourceAdapter>,
        acks: Arc<Mutex<Vec<Option<Uuid>>>>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let event_log = Arc::new(MemoryEventLog::new());
        let alerter = Arc::new(RecordingAlerter::default());
        let runner = Runner::new(
            adapter,
            validator,
            storage.clone(),
            Arc::new(CsvReportParser::new()),
            event_log.clone(),
            alerter.clone(),
            runner_config(),
        );
        Self {
            runner,
            acks,
            storage,
            event_log,
            alerter,
        }
    }

    async fn event_for(&self, outcome: &Outcome) -> IngestionEvent {
        let id = outcome.ingestion_id.expect("outcome carries an ingestion id");
        self.event_log
            .get_event(id)
            .await
            .unwrap()
            .expect("event persisted")
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_valid_report_completes_and_is_acknowledged() {
    let mut h = Harness::new(vec![Ok(Some(payload("reports@amazon.com", GOOD_CSV)))]);

    let outcome = h.runner.process_one().await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Action::Received);
    assert!(outcome.error.is_none());

    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::Completed);
    assert_eq!(event.account_id.as_deref(), Some("acct-test"));
    assert_eq!(event.metadata["rows"], 2);
    assert_eq!(event.metadata["dropped_rows"], 0);
    assert!(event.fingerprint.is_some());

    // Artifact stored under the key recorded on the event.
    let key = event.raw_file_path.expect("raw file path recorded");
    assert_eq!(h.storage.get(&key).await.unwrap(), GOOD_CSV.as_bytes());

    // Acknowledged exactly once, after commit, with the event id.
    assert_eq!(*h.acks.lock().unwrap(), vec![outcome.ingestion_id]);
    assert!(h.alerter.recorded().is_empty());
}

#[tokio::test]
async fn test_untrusted_sender_rejected_and_consumed() {
    let mut h = Harness::new(vec![Ok(Some(payload("spoofer@gmail.com", GOOD_CSV)))]);

    let outcome = h.runner.process_one().await;

    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::Rejected);

    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::Failed);
    assert!(event
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("Sender not allowed"));

    // Consumed, not retried, and nothing was stored.
    assert_eq!(h.acks.lock().unwrap().len(), 1);
    assert!(h.storage.is_empty());

    let alerts = h.alerter.recorded();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, AlertSeverity::High);
    assert!(alerts[0].1.contains("spoofer@gmail.com"));
}

#[tokio::test]
async fn test_lookalike_domain_rejected() {
    let mut h = Harness::new(vec![Ok(Some(payload("amazon@fake.com", GOOD_CSV)))]);
    let outcome = h.runner.process_one().await;
    assert_eq!(outcome.action, Action::Rejected);
}

#[tokio::test]
async fn test_storage_failure_leaves_item_unread() {
    let (adapter, acks) = ScriptedAdapter::new(vec![Ok(Some(payload(
        "reports@amazon.com",
        GOOD_CSV,
    )))]);
    let event_log = Arc::new(MemoryEventLog::new());
    let alerter = Arc::new(RecordingAlerter::default());
    let mut runner = Runner::new(
        Box::new(adapter),
        Arc::new(IdentityValidator::new(&validation_config())),
        Arc::new(BrokenStorage),
        Arc::new(CsvReportParser::new()),
        event_log.clone(),
        alerter.clone(),
        runner_config(),
    );

    let outcome = runner.process_one().await;

    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::StorageError);
    assert!(outcome.ingestion_id.is_none());
    assert!(outcome.error.as_deref().unwrap_or_default().contains("bucket unavailable"));

    // Not acknowledged: the next pass must see the same item again.
    assert!(acks.lock().unwrap().is_empty());
    // No audit row either; the event is only created once the artifact holds.
    assert!(event_log.is_empty());

    let alerts = alerter.recorded();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, AlertSeverity::High);
}

#[tokio::test]
async fn test_adapter_structural_error_is_acknowledged() {
    let mut h = Harness::new(vec![Err(IngestError::Adapter(
        "no csv attachment found in message".to_string(),
    ))]);

    let outcome = h.runner.process_one().await;

    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::AdapterError);

    // Acknowledged despite the failure, so the malformed message cannot
    // wedge the mailbox.
    assert_eq!(*h.acks.lock().unwrap(), vec![None]);

    let alerts = h.alerter.recorded();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].1.contains("no csv attachment"));
}

#[tokio::test]
async fn test_excessive_drop_rate_quarantines() {
    let mut h = Harness::new(vec![Ok(Some(payload("reports@amazon.com", NOISY_CSV)))]);

    let outcome = h.runner.process_one().await;

    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::Quarantined);

    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::Quarantine);
    assert!(event
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("drop rate"));
    assert!(event.metadata["warnings"].is_array());

    // The artifact is kept for review and the message is consumed.
    assert_eq!(h.storage.len(), 1);
    assert_eq!(h.acks.lock().unwrap().len(), 1);
    assert_eq!(h.alerter.recorded().len(), 1);
}

#[tokio::test]
async fn test_missing_required_header_quarantines() {
    let mut h = Harness::new(vec![Ok(Some(payload("reports@amazon.com", HEADERLESS_CSV)))]);

    let outcome = h.runner.process_one().await;

    assert_eq!(outcome.action, Action::Quarantined);
    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::Quarantine);
    assert!(event
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("search_term"));
}

#[tokio::test]
async fn test_duplicate_submission_ignored() {
    let (adapter, acks) = ScriptedAdapter::new(vec![Ok(Some(payload(
        "reports@amazon.com",
        GOOD_CSV,
    )))]);
    let mut h = Harness::build(
        Box::new(adapter),
        acks,
        Arc::new(AlwaysDuplicate(IdentityValidator::new(&validation_config()))),
    );

    let outcome = h.runner.process_one().await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Action::DuplicateIgnored);

    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::DuplicateIgnored);
    assert!(event.fingerprint.is_some());

    // Skipped before storage; still consumed at the source.
    assert!(h.storage.is_empty());
    assert_eq!(h.acks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_acknowledge_failure_marks_event_failed() {
    let (adapter, acks) = ScriptedAdapter::new(vec![Ok(Some(payload(
        "reports@amazon.com",
        GOOD_CSV,
    )))]);
    let adapter = adapter.with_failing_ack();
    let mut h = Harness::build(
        Box::new(adapter),
        acks,
        Arc::new(IdentityValidator::new(&validation_config())),
    );

    let outcome = h.runner.process_one().await;

    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::AdapterError);

    // The item stays unread at the source; the event records why this
    // attempt did not complete.
    let event = h.event_for(&outcome).await;
    assert_eq!(event.status, IngestionStatus::Failed);
    assert!(event
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("acknowledge failed"));
}

#[tokio::test]
async fn test_empty_mailbox_reports_no_emails() {
    let mut h = Harness::new(vec![Ok(None)]);
    let outcome = h.runner.process_one().await;

    // Nothing ingested: the flag stays down, but it is not an error either.
    assert!(!outcome.success);
    assert_eq!(outcome.action, Action::NoEmails);
    assert!(outcome.error.is_none());
    assert!(outcome.ingestion_id.is_none());

    // And no side effects anywhere: no audit row, no artifact, no ack.
    assert!(h.event_log.is_empty());
    assert!(h.storage.is_empty());
    assert!(h.acks.lock().unwrap().is_empty());
    assert!(h.alerter.recorded().is_empty());
}

// ============================================================================
// Batch loop
// ============================================================================

#[tokio::test]
async fn test_process_all_drains_mixed_batch() {
    let mut h = Harness::new(vec![
        Ok(Some(payload("reports@amazon.com", GOOD_CSV))),
        Ok(Some(payload("spoofer@gmail.com", GOOD_CSV))),
        Ok(Some(payload("reports@amazon.com", GOOD_CSV))),
        Ok(None),
    ]);

    let outcomes = h.runner.process_all().await;

    let actions: Vec<Action> = outcomes.iter().map(|o| o.action).collect();
    assert_eq!(actions, vec![Action::Received, Action::Rejected, Action::Received]);

    // Two completions plus one rejection audit row.
    assert_eq!(h.event_log.len(), 3);
    assert_eq!(h.storage.len(), 2);
    assert_eq!(h.acks.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_process_all_honors_iteration_ceiling() {
    let items: Vec<Result<Option<IngestionPayload>>> = (0..20)
        .map(|_| Ok(Some(payload("reports@amazon.com", GOOD_CSV))))
        .collect();
    let (adapter, _acks) = ScriptedAdapter::new(items);
    let mut runner = Runner::new(
        Box::new(adapter),
        Arc::new(IdentityValidator::new(&validation_config())),
        Arc::new(MemoryStorage::new()),
        Arc::new(CsvReportParser::new()),
        Arc::new(MemoryEventLog::new()),
        Arc::new(RecordingAlerter::default()),
        RunnerConfig {
            max_iterations: 5,
            pause_ms: 0,
        },
    );

    let outcomes = runner.process_all().await;
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.action == Action::Received));
}

#[tokio::test]
async fn test_process_all_continues_past_failures() {
    let mut h = Harness::new(vec![
        Err(IngestError::Adapter("malformed message".to_string())),
        Ok(Some(payload("reports@amazon.com", GOOD_CSV))),
        Ok(None),
    ]);

    let outcomes = h.runner.process_all().await;
    let actions: Vec<Action> = outcomes.iter().map(|o| o.action).collect();
    assert_eq!(actions, vec![Action::AdapterError, Action::Received]);
}
