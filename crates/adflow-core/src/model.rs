//! Value types and the ingestion state machine
//!
//! The transition table in [`IngestionStatus::allowed_successors`] is the
//! single authority on status changes. No component writes a status
//! directly; every change goes through `EventLog::update_status`, which
//! consults this table first.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Drop-rate ceiling for partial parse tolerance. Strictly above this and
/// the whole file is quarantined rather than partially committed.
pub const MAX_DROP_RATE: f64 = 0.01;

/// Where an ingestion attempt originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Email,
    Api,
    Manual,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Email => "EMAIL",
            SourceKind::Api => "API",
            SourceKind::Manual => "MANUAL",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(SourceKind::Email),
            "API" => Ok(SourceKind::Api),
            "MANUAL" => Ok(SourceKind::Manual),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

/// Status of an ingestion event through the pipeline.
///
/// Valid transitions:
///
/// ```text
/// RECEIVED   -> PROCESSING
/// PROCESSING -> COMPLETED | QUARANTINE | FAILED
/// FAILED     -> PROCESSING   (manual only)
/// QUARANTINE -> PROCESSING   (manual only)
/// COMPLETED         (terminal)
/// DUPLICATE_IGNORED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Received,
    Processing,
    Completed,
    Failed,
    Quarantine,
    DuplicateIgnored,
}

impl IngestionStatus {
    /// The set of statuses this status may legally transition into.
    pub const fn allowed_successors(self) -> &'static [IngestionStatus] {
        use IngestionStatus::*;
        match self {
            Received => &[Processing],
            Processing => &[Completed, Quarantine, Failed],
            // Manual operator action only
            Failed => &[Processing],
            Quarantine => &[Processing],
            Completed => &[],
            DuplicateIgnored => &[],
        }
    }

    /// Check whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: IngestionStatus) -> bool {
        self.allowed_successors().contains(&to)
    }

    /// Terminal statuses have an empty successor set; events become
    /// immutable once they reach one.
    pub fn is_terminal(self) -> bool {
        self.allowed_successors().is_empty()
    }

    /// All statuses, for exhaustive table checks.
    pub const ALL: [IngestionStatus; 6] = [
        IngestionStatus::Received,
        IngestionStatus::Processing,
        IngestionStatus::Completed,
        IngestionStatus::Failed,
        IngestionStatus::Quarantine,
        IngestionStatus::DuplicateIgnored,
    ];
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestionStatus::Received => "RECEIVED",
            IngestionStatus::Processing => "PROCESSING",
            IngestionStatus::Completed => "COMPLETED",
            IngestionStatus::Failed => "FAILED",
            IngestionStatus::Quarantine => "QUARANTINE",
            IngestionStatus::DuplicateIgnored => "DUPLICATE_IGNORED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for IngestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(IngestionStatus::Received),
            "PROCESSING" => Ok(IngestionStatus::Processing),
            "COMPLETED" => Ok(IngestionStatus::Completed),
            "FAILED" => Ok(IngestionStatus::Failed),
            "QUARANTINE" => Ok(IngestionStatus::Quarantine),
            "DUPLICATE_IGNORED" => Ok(IngestionStatus::DuplicateIgnored),
            other => Err(format!("unknown ingestion status: {}", other)),
        }
    }
}

/// Payload handed from an adapter to the validator.
///
/// Created once by the adapter, immutable afterwards. Every adapter kind
/// (mailbox, API, manual upload) produces the same shape.
#[derive(Debug, Clone)]
pub struct IngestionPayload {
    pub account_id: String,
    pub sender: String,
    pub content: Vec<u8>,
    pub filename: String,
    pub source: SourceKind,
    pub received_at: DateTime<Utc>,
    pub subject: Option<String>,
}

/// Outcome of the validation layer. Created fresh per `validate` call;
/// all checks run, errors accumulate rather than short-circuit.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub account_id: Option<String>,
    pub errors: Vec<String>,
    pub is_duplicate: bool,
    /// Always computed, independent of whether validation passed.
    pub fingerprint: String,
}

/// One audit row per ingestion attempt.
#[derive(Debug, Clone)]
pub struct IngestionEvent {
    pub ingestion_id: Uuid,
    pub account_id: Option<String>,
    pub source: SourceKind,
    pub status: IngestionStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub metadata: JsonValue,
    pub fingerprint: Option<String>,
    pub raw_file_path: Option<String>,
}

/// Single normalized row extracted from a report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    pub report_date: NaiveDate,
    pub campaign_name: String,
    pub ad_group_name: String,
    pub search_term: String,
    pub impressions: u64,
    pub clicks: u64,
    pub spend: f64,
    pub sales_7d: f64,
}

/// Result of parsing one report file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub success: bool,
    pub rows: Vec<ParsedRow>,
    pub total_rows: usize,
    pub dropped_rows: usize,
    pub warnings: Vec<String>,
}

impl ParseResult {
    /// Proportion of input rows discarded during parsing.
    pub fn drop_rate(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        self.dropped_rows as f64 / self.total_rows as f64
    }

    /// Above 1% dropped rows the whole file goes to human review instead of
    /// being partially committed. Strictly `>`, so exactly 1% still passes.
    pub fn should_quarantine(&self) -> bool {
        self.drop_rate() > MAX_DROP_RATE
    }
}
