// src/services/extractor.rs

//! Live table extraction.
//!
//! Turns the live SMS page into [`Record`]s. Each row of the SMS table
//! carries a label cell (country marker and phone number), the sid cell and
//! the message cell; rows with fewer cells are skipped.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ExtractionConfig, Record};
use crate::services::classifier;
use crate::utils::{countries, strip_whitespace};

static COUNTRY_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([A-Z]{2})").unwrap());
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\+\d{1,3}[\s\d\-\(\)]+|\d{10,})").unwrap());
static RANGE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+\d+|range|number").unwrap());

/// Everything pulled out of one live page.
#[derive(Debug)]
pub struct PageExtraction {
    /// Records in page order, top to bottom, or a parse error when the SMS
    /// table is missing
    pub records: Result<Vec<Record>>,
    /// Number-range labels found next to the table
    pub ranges: Vec<String>,
}

/// Parses live pages using the configured table and range selectors.
pub struct Extractor {
    table: Selector,
    row: Selector,
    cell: Selector,
    range_section: Selector,
    range_item: Selector,
    default_country_code: String,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            table: parse_selector(&format!("table#{}", config.table_id))?,
            row: parse_selector("tr")?,
            cell: parse_selector("td")?,
            range_section: parse_selector(&config.range_selector)?,
            range_item: parse_selector("div, span, p")?,
            default_country_code: config.default_country_code.clone(),
        })
    }

    /// Extract records and range labels from a decoded page.
    ///
    /// Range labels are best-effort and are returned even when the SMS table
    /// is missing.
    pub fn extract(&self, html: &str, now: DateTime<Local>) -> PageExtraction {
        let document = Html::parse_document(html);
        PageExtraction {
            ranges: self.extract_ranges(&document),
            records: self.extract_records(&document, now),
        }
    }

    fn extract_records(&self, document: &Html, now: DateTime<Local>) -> Result<Vec<Record>> {
        let table = document
            .select(&self.table)
            .next()
            .ok_or_else(|| AppError::parse("SMS table not found in live page"))?;

        let rows: Vec<ElementRef> = table.select(&self.row).collect();
        log::info!("Found {} rows in SMS table", rows.len());

        let records: Vec<Record> = rows
            .iter()
            .filter_map(|row| self.parse_row(row, now))
            .filter(|record| classifier::is_supported(record.platform))
            .collect();

        log::info!("Parsed {} SMS records", records.len());
        Ok(records)
    }

    fn parse_row(&self, row: &ElementRef, now: DateTime<Local>) -> Option<Record> {
        let cells: Vec<String> = row.select(&self.cell).map(|c| cell_text(&c)).collect();
        if cells.len() < 3 {
            return None;
        }

        let label = &cells[0];
        let sid = &cells[1];
        let message = &cells[2];

        let country_code = COUNTRY_CODE
            .captures(label)
            .and_then(|c| c.get(1))
            .map_or_else(|| self.default_country_code.clone(), |m| m.as_str().to_string());
        let phone_number = PHONE
            .captures(label)
            .and_then(|c| c.get(1))
            .map(|m| strip_whitespace(m.as_str()))
            .unwrap_or_default();

        Some(Record {
            id: Record::digest(sid, message, &now),
            platform: classifier::classify(sid, message, label),
            country: countries::country_name(&country_code).to_string(),
            country_code,
            sid: sid.clone(),
            phone_number,
            message: message.clone(),
            raw_text: label.clone(),
            received_at: now,
        })
    }

    fn extract_ranges(&self, document: &Html) -> Vec<String> {
        let Some(section) = document.select(&self.range_section).next() else {
            log::debug!("No range section in live page");
            return Vec::new();
        };

        let ranges: Vec<String> = section
            .select(&self.range_item)
            .map(|el| cell_text(&el))
            .filter(|text| RANGE_LABEL.is_match(&text.to_lowercase()))
            .collect();

        if !ranges.is_empty() {
            log::info!("Found {} ranges", ranges.len());
        }
        ranges
    }
}

/// Concatenate the trimmed text nodes of an element.
fn cell_text(el: &ElementRef) -> String {
    el.text().map(str::trim).collect()
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::TimeZone;

    const PAGE: &str = r#"
<html><body>
  <div class="card-body">
    <p>Live feed</p>
    <span>NIGERIA 234801</span>
    <span>+2348012 range</span>
    <div>Numbers available</div>
  </div>
  <table id="LiveTestSMS">
    <thead><tr><th>Range</th><th>SID</th><th>Message</th></tr></thead>
    <tbody>
      <tr>
        <td><span>NG</span> <span>+234 801 234 5678</span></td>
        <td>WhatsApp</td>
        <td>Your WhatsApp code is 123-456</td>
      </tr>
      <tr>
        <td>india 9123456789</td>
        <td>sid-2</td>
        <td>random text</td>
      </tr>
      <tr><td>short</td><td>row</td></tr>
      <tr>
        <td>GB</td>
        <td>Instagram</td>
        <td>Use 112233 to verify your Instagram account</td>
      </tr>
    </tbody>
  </table>
</body></html>
"#;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 1, 18, 9, 15, 0).unwrap()
    }

    fn extractor() -> Extractor {
        Extractor::new(&ExtractionConfig::default()).unwrap()
    }

    fn records(html: &str) -> Vec<Record> {
        extractor().extract(html, now()).records.unwrap()
    }

    #[test]
    fn test_extracts_rows_in_page_order() {
        let records = records(PAGE);
        let sids: Vec<&str> = records.iter().map(|r| r.sid.as_str()).collect();
        assert_eq!(sids, vec!["WhatsApp", "sid-2", "Instagram"]);
    }

    #[test]
    fn test_label_cell_fields() {
        let records = records(PAGE);
        let first = &records[0];

        assert_eq!(first.platform, Platform::WhatsApp);
        assert_eq!(first.country_code, "NG");
        assert_eq!(first.country, "Nigeria");
        assert_eq!(first.phone_number, "+2348012345678");
        assert_eq!(first.raw_text, "NG+234 801 234 5678");
        assert_eq!(first.received_at, now());
        assert_eq!(first.id.len(), 8);
    }

    #[test]
    fn test_defaults_when_label_has_no_markers() {
        let records = records(PAGE);
        let second = &records[1];

        assert_eq!(second.country_code, "US");
        assert_eq!(second.country, "United States");
        assert_eq!(second.phone_number, "9123456789");
        assert_eq!(second.platform, Platform::Facebook);
    }

    #[test]
    fn test_short_rows_and_header_skipped() {
        let records = records(PAGE);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].platform, Platform::Instagram);
        assert_eq!(records[2].phone_number, "");
    }

    #[test]
    fn test_range_labels() {
        let page = extractor().extract(PAGE, now());
        assert_eq!(page.ranges, vec!["+2348012 range", "Numbers available"]);
    }

    #[test]
    fn test_missing_table_is_parse_error() {
        let page = extractor().extract("<html><body><p>Please log in</p></body></html>", now());
        assert!(matches!(page.records, Err(AppError::Parse(_))));
    }

    #[test]
    fn test_ranges_kept_without_table() {
        let page = extractor().extract(
            r#"<div class="card-body"><span>+2547 range</span></div><p>maintenance</p>"#,
            now(),
        );
        assert!(page.records.is_err());
        assert_eq!(page.ranges, vec!["+2547 range"]);
    }

    #[test]
    fn test_empty_table_yields_no_records() {
        let page = extractor().extract(r#"<table id="LiveTestSMS"></table>"#, now());
        assert!(page.records.unwrap().is_empty());
        assert!(page.ranges.is_empty());
    }

    #[test]
    fn test_cell_inner_whitespace_preserved() {
        let records = records(
            "<table id=\"LiveTestSMS\"><tr><td>NG</td><td>sid 7</td>\
             <td>  Code:\n  123   456  </td></tr></table>",
        );
        assert_eq!(records[0].sid, "sid 7");
        assert_eq!(records[0].message, "Code:\n  123   456");
    }

    #[test]
    fn test_invalid_table_id_rejected() {
        let config = ExtractionConfig {
            table_id: "[[bad".into(),
            ..ExtractionConfig::default()
        };
        assert!(Extractor::new(&config).is_err());
    }
}
