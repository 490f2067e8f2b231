//! Adflow Common Library
//!
//! Shared error taxonomy, fingerprint hashing, and logging setup for the
//! adflow workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the [`IngestError`] taxonomy shared by every
//!   pipeline component
//! - **Fingerprints**: deterministic SHA-256 hashes for duplicate detection
//! - **Logging**: centralized tracing initialization

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{IngestError, Result};
