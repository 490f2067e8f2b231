//! CSV parsing engine
//!
//! Resolves required fields through a header-synonym table (a field may
//! appear under several spellings across report exports), coerces row
//! values with per-row failure tolerance, and computes the report-window
//! fingerprint used for resubmission detection.
//!
//! Row-level failures are dropped and counted; the file-level policy in
//! [`ParseResult::should_quarantine`] decides whether the remainder is
//! still committed.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use adflow_common::{fingerprint, IngestError, Result};

use crate::contract::ReportParser;
use crate::model::{ParseResult, ParsedRow};

/// Accepted spellings per required field, in resolution order.
const REQUIRED_HEADERS: &[(&str, &[&str])] = &[
    ("report_date", &["Date", "Day"]),
    ("campaign_name", &["Campaign Name"]),
    ("ad_group_name", &["Ad Group Name"]),
    ("search_term", &["Customer Search Term"]),
    ("impressions", &["Impressions"]),
    ("clicks", &["Clicks"]),
    ("spend", &["Spend"]),
];

/// Optional fields default to zero when the column is absent.
const OPTIONAL_HEADERS: &[(&str, &[&str])] = &[(
    "sales_7d",
    &["7 Day Total Sales", "7-Day Total Sales", "Total Sales"],
)];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y"];

/// CSV implementation of the parsing engine contract.
#[derive(Default)]
pub struct CsvReportParser;

impl CsvReportParser {
    pub fn new() -> Self {
        Self
    }

    /// Inclusive date span covered by a set of parsed rows.
    pub fn date_range(rows: &[ParsedRow]) -> Option<(NaiveDate, NaiveDate)> {
        let first = rows.iter().map(|r| r.report_date).min()?;
        let last = rows.iter().map(|r| r.report_date).max()?;
        Some((first, last))
    }

    fn resolve_header(headers: &csv::StringRecord, synonyms: &[&str]) -> Option<usize> {
        headers
            .iter()
            .position(|h| synonyms.iter().any(|s| s.eq_ignore_ascii_case(h.trim())))
    }

    fn parse_date(value: &str) -> Option<NaiveDate> {
        DATE_FORMATS
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(value.trim(), f).ok())
    }

    fn parse_count(value: &str) -> Option<u64> {
        let cleaned: String = value.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
        cleaned.parse().ok()
    }

    /// Monetary and percentage columns arrive with currency symbols,
    /// thousands separators, or a trailing percent sign.
    fn parse_amount(value: &str) -> Option<f64> {
        let cleaned: String = value
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        cleaned.parse().ok()
    }

    fn extract_row(
        record: &csv::StringRecord,
        fields: &[(&'static str, usize)],
        sales_idx: Option<usize>,
    ) -> std::result::Result<ParsedRow, String> {
        let get = |name: &str| -> std::result::Result<&str, String> {
            let idx = fields
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, i)| *i)
                .ok_or_else(|| format!("unresolved field {}", name))?;
            match record.get(idx).map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(format!("missing value for {}", name)),
            }
        };

        let report_date = Self::parse_date(get("report_date")?)
            .ok_or_else(|| "unparseable report date".to_string())?;
        let impressions = Self::parse_count(get("impressions")?)
            .ok_or_else(|| "unparseable impressions".to_string())?;
        let clicks =
            Self::parse_count(get("clicks")?).ok_or_else(|| "unparseable clicks".to_string())?;
        let spend =
            Self::parse_amount(get("spend")?).ok_or_else(|| "unparseable spend".to_string())?;

        // Optional column: absent column or blank cell both mean zero.
        let sales_7d = sales_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self::parse_amount(v).ok_or_else(|| "unparseable sales".to_string()))
            .transpose()?
            .unwrap_or(0.0);

        Ok(ParsedRow {
            report_date,
            campaign_name: get("campaign_name")?.to_string(),
            ad_group_name: get("ad_group_name")?.to_string(),
            search_term: get("search_term")?.to_string(),
            impressions,
            clicks,
            spend,
            sales_7d,
        })
    }
}

#[async_trait]
impl ReportParser for CsvReportParser {
    async fn parse(&self, content: &[u8]) -> Result<ParseResult> {
        let text = std::str::from_utf8(content).map_err(|_| IngestError::Parse {
            message: "file is not valid UTF-8".to_string(),
            dropped_rows: 0,
            total_rows: 0,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| IngestError::Parse {
                message: format!("unreadable header row: {}", e),
                dropped_rows: 0,
                total_rows: 0,
            })?
            .clone();

        // Strict mode: every required field must resolve to a column.
        let mut fields = Vec::with_capacity(REQUIRED_HEADERS.len());
        for (name, synonyms) in REQUIRED_HEADERS {
            match Self::resolve_header(&headers, synonyms) {
                Some(idx) => fields.push((*name, idx)),
                None => {
                    return Err(IngestError::Parse {
                        message: format!(
                            "missing required header {} (accepted: {})",
                            name,
                            synonyms.join(", ")
                        ),
                        dropped_rows: 0,
                        total_rows: 0,
                    })
                },
            }
        }

        let sales_idx = OPTIONAL_HEADERS
            .iter()
            .find(|(name, _)| *name == "sales_7d")
            .and_then(|(_, synonyms)| Self::resolve_header(&headers, synonyms));

        let mut result = ParseResult::default();

        for (line, record) in reader.records().enumerate() {
            result.total_rows += 1;
            let parsed = record
                .map_err(|e| e.to_string())
                .and_then(|r| Self::extract_row(&r, &fields, sales_idx));
            match parsed {
                Ok(row) => result.rows.push(row),
                Err(reason) => {
                    result.dropped_rows += 1;
                    // +2: header row plus 1-based numbering.
                    result.warnings.push(format!("row {}: {}", line + 2, reason));
                },
            }
        }

        result.success = !result.should_quarantine();

        debug!(
            total_rows = result.total_rows,
            dropped_rows = result.dropped_rows,
            quarantine = result.should_quarantine(),
            "report parsed"
        );

        Ok(result)
    }

    fn compute_fingerprint(
        &self,
        sender: &str,
        filename: &str,
        date_range: (NaiveDate, NaiveDate),
    ) -> String {
        fingerprint::report_window_fingerprint(sender, filename, date_range)
    }
}
