//! Source adapters
//!
//! Each adapter turns a source-specific retrieval protocol into the common
//! receive/acknowledge contract and produces identical
//! [`IngestionPayload`](crate::model::IngestionPayload) values. The mailbox
//! adapter is the only phase-1 implementation; API and manual-upload
//! sources plug in behind the same trait.

pub mod imap;

pub use imap::ImapAdapter;
