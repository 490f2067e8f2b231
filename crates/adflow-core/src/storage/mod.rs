//! Raw artifact storage backends
//!
//! The pipeline only ever talks to the [`RawStorage`](crate::contract::RawStorage)
//! contract; these modules provide the S3-compatible production backend and
//! an in-memory backend for tests and local runs.

pub mod memory;
pub mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

use chrono::Utc;
use uuid::Uuid;

/// Storage key for a raw artifact: `{account_id}/{YYYY-MM-DD}/{uuid}.{ext}`.
///
/// The date segment keeps retention sweeps cheap; the uuid keeps keys
/// collision-free even for identical filenames.
pub(crate) fn build_key(account_id: &str, filename: &str) -> String {
    let date = Utc::now().format("%Y-%m-%d");
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("csv");
    format!("{}/{}/{}.{}", account_id, date, Uuid::new_v4(), extension)
}
