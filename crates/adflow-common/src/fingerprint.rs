//! Fingerprint hashing for duplicate detection
//!
//! Two distinct fingerprints exist:
//!
//! - the **identity fingerprint** over `(sender, subject, filename, size)`,
//!   computed for every payload regardless of validation outcome, and
//! - the **report-window fingerprint** over `(sender, filename, date range)`,
//!   which detects resubmission of the same report window even when the
//!   physical file differs.
//!
//! Both are pure functions of their inputs. The joined input strings use
//! different shapes, so the two fingerprints never collide for the same
//! sender/filename pair.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Fingerprint of a physical artifact as it arrived from the source.
///
/// The sender is lowercased before hashing; mail infrastructure is free to
/// change the case of an address in transit.
pub fn identity_fingerprint(sender: &str, subject: &str, filename: &str, size: usize) -> String {
    let data = format!("{}|{}|{}|{}", sender.to_lowercase().trim(), subject, filename, size);
    sha256_hex(data.as_bytes())
}

/// Fingerprint of a report window, independent of byte-level file identity.
pub fn report_window_fingerprint(
    sender: &str,
    filename: &str,
    date_range: (NaiveDate, NaiveDate),
) -> String {
    let data = format!(
        "{}|{}|{}..{}",
        sender.to_lowercase().trim(),
        filename,
        date_range.0,
        date_range.1
    );
    sha256_hex(data.as_bytes())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_identity_fingerprint_is_deterministic() {
        let a = identity_fingerprint("reports@amazon.com", "STR week 31", "str.csv", 1024);
        let b = identity_fingerprint("reports@amazon.com", "STR week 31", "str.csv", 1024);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_identity_fingerprint_sender_case_insensitive() {
        let a = identity_fingerprint("Reports@Amazon.com", "s", "f.csv", 10);
        let b = identity_fingerprint("reports@amazon.com", "s", "f.csv", 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_fingerprint_changes_with_any_input() {
        let base = identity_fingerprint("a@amazon.com", "subj", "f.csv", 10);
        assert_ne!(base, identity_fingerprint("b@amazon.com", "subj", "f.csv", 10));
        assert_ne!(base, identity_fingerprint("a@amazon.com", "other", "f.csv", 10));
        assert_ne!(base, identity_fingerprint("a@amazon.com", "subj", "g.csv", 10));
        assert_ne!(base, identity_fingerprint("a@amazon.com", "subj", "f.csv", 11));
    }

    #[test]
    fn test_report_window_fingerprint_tracks_date_range() {
        let w1 = report_window_fingerprint(
            "a@amazon.com",
            "f.csv",
            (date("2025-07-01"), date("2025-07-07")),
        );
        let w2 = report_window_fingerprint(
            "a@amazon.com",
            "f.csv",
            (date("2025-07-08"), date("2025-07-14")),
        );
        assert_ne!(w1, w2);
    }

    #[test]
    fn test_fingerprint_kinds_are_domain_separated() {
        // Same sender and filename must not collide across the two kinds.
        let identity = identity_fingerprint("a@amazon.com", "", "f.csv", 0);
        let window = report_window_fingerprint(
            "a@amazon.com",
            "f.csv",
            (date("2025-07-01"), date("2025-07-07")),
        );
        assert_ne!(identity, window);
    }
}
