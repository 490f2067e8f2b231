//! Adflow Core
//!
//! Ingestion pipeline for advertising-performance report files. Pulls
//! reports from an external mailbox, verifies origin and structure,
//! persists the raw artifact, parses it into normalized rows with
//! partial-failure tolerance, and records every attempt in a
//! state-machine-governed audit log.
//!
//! # Pipeline
//!
//! ```text
//! Runner -> SourceAdapter.receive() -> Validator.validate()
//!        -> RawStorage.put() -> EventLog.create_event()/update_status()
//!        -> ReportParser.parse() -> SourceAdapter.acknowledge()
//! ```
//!
//! Each component is a flat trait in [`contract`]; concrete backends
//! (IMAP mailbox, S3 storage, Postgres event log, webhook alerter) live in
//! their own modules and are wired together by [`runner::Runner`] from an
//! explicit [`config::Config`] built once at process start.

pub mod adapter;
pub mod alert;
pub mod config;
pub mod contract;
pub mod eventlog;
pub mod model;
pub mod parser;
pub mod runner;
pub mod storage;
pub mod validator;
