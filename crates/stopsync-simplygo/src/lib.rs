//! SimplyGo eGuide scraper, the external authority for stop names.
//!
//! The eGuide exposes a code search form; posting a stop code returns an
//! HTML page whose result table carries the road name and the official
//! stop description. The page is untrusted input: bodies are size-capped
//! and the extractor treats markup variations defensively. Two layouts
//! appear in the wild, a header row over a value row and two-column
//! label/value rows; both are handled, and a header label echoed in a
//! value cell is discarded rather than mistaken for a name.
//!
//! An answer with neither field is a definitive "no data for this code" —
//! that is the scheduler's cue to fail the item without retrying.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;
use tracing::debug;
use url::Url;

use stopsync_catalog::{LookupError, LookupRecord, NameLookup};

const DEFAULT_ENDPOINT: &str = "https://svc.simplygo.com.sg/eservice/eguide/bscode_idx.php";
const DEFAULT_USER_AGENT: &str = "stopsync/0.3 (bus stop catalog reconciliation)";
const FORM_FIELD: &str = "bs_code";
const ROAD_NAME_HEADER: &str = "Road Name";
const DESCRIPTION_HEADER: &str = "Bus Stop Description";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimplyGoConfig {
    pub endpoint: Url,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Pause before every request; this client is a guest on the eGuide.
    pub politeness_delay: Duration,
    /// Bodies larger than this are rejected unread.
    pub max_body_bytes: usize,
}

impl Default for SimplyGoConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            politeness_delay: Duration::from_millis(300),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct SimplyGoClient {
    client: Client,
    config: SimplyGoConfig,
}

impl SimplyGoClient {
    pub fn new(config: SimplyGoConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("stopsync")),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build http client");
        Self { client, config }
    }
}

#[async_trait]
impl NameLookup for SimplyGoClient {
    async fn fetch(&self, code: &str) -> Result<LookupRecord, LookupError> {
        sleep(self.config.politeness_delay).await;

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .form(&[(FORM_FIELD, code)])
            .send()
            .await
            .map_err(|err| LookupError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_body_bytes {
                return Err(LookupError::OversizedResponse(length as usize));
            }
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| LookupError::Request(err.to_string()))?;
        if bytes.len() > self.config.max_body_bytes {
            return Err(LookupError::OversizedResponse(bytes.len()));
        }

        let body = String::from_utf8_lossy(&bytes);
        let record = parse_lookup_page(&body);
        debug!(code, found = record.is_success(), "eguide answered");
        Ok(record)
    }
}

// ============================================================================
// Page Extraction
// ============================================================================

/// Extracts the road name and stop description from an eGuide result page.
/// Infallible: anything unrecognizable yields an empty record.
pub fn parse_lookup_page(html: &str) -> LookupRecord {
    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table").unwrap();
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("th, td").unwrap();

    let mut record = LookupRecord::default();

    for table in document.select(&table_selector) {
        let rows: Vec<Vec<String>> = table
            .select(&row_selector)
            .map(|row| {
                row.select(&cell_selector)
                    .map(|cell| cell_text(&cell))
                    .collect()
            })
            .collect();

        // Header row over a value row: the header names the columns, the
        // following row carries the values at the same positions.
        for (index, row) in rows.iter().enumerate() {
            let road_column = column_of(row, ROAD_NAME_HEADER);
            let description_column = column_of(row, DESCRIPTION_HEADER);
            if road_column.is_none() && description_column.is_none() {
                continue;
            }
            let Some(values) = rows.get(index + 1) else {
                continue;
            };
            if record.road_name.is_none() {
                record.road_name = road_column
                    .and_then(|column| values.get(column))
                    .and_then(|value| clean_value(value));
            }
            if record.description.is_none() {
                record.description = description_column
                    .and_then(|column| values.get(column))
                    .and_then(|value| clean_value(value));
            }
        }

        // Label/value rows: a label cell directly followed by its value.
        for row in &rows {
            for pair in row.windows(2) {
                if record.road_name.is_none() && pair[0].eq_ignore_ascii_case(ROAD_NAME_HEADER) {
                    record.road_name = clean_value(&pair[1]);
                }
                if record.description.is_none()
                    && pair[0].eq_ignore_ascii_case(DESCRIPTION_HEADER)
                {
                    record.description = clean_value(&pair[1]);
                }
            }
        }

        if record.is_success() {
            break;
        }
    }

    record
}

fn column_of(row: &[String], header: &str) -> Option<usize> {
    row.iter().position(|cell| cell.eq_ignore_ascii_case(header))
}

/// A usable value is non-empty after trimming and is not one of the header
/// labels — pages with no result sometimes echo the labels where values
/// would go.
fn clean_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case(ROAD_NAME_HEADER)
        || trimmed.eq_ignore_ascii_case(DESCRIPTION_HEADER)
    {
        return None;
    }
    Some(trimmed.to_string())
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for piece in cell.text() {
        for word in piece.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_a_header_row_result_table() {
        let html = r#"
            <html><body>
            <table><tr><td>Home</td><td>Bus Services</td></tr></table>
            <table>
                <tr><th>Bus Stop Code</th><th>Road Name</th><th>Bus Stop Description</th></tr>
                <tr><td>01012</td><td>Victoria St</td><td>Hotel Grand Pacific</td></tr>
            </table>
            </body></html>
        "#;

        let record = parse_lookup_page(html);
        assert_eq!(record.road_name.as_deref(), Some("Victoria St"));
        assert_eq!(record.description.as_deref(), Some("Hotel Grand Pacific"));
        assert!(record.is_success());
    }

    #[test]
    fn extracts_from_label_value_rows() {
        let html = r#"
            <table>
                <tr><td>Bus Stop Code</td><td>01013</td></tr>
                <tr><td>Road Name</td><td>Victoria St</td></tr>
                <tr><td>Bus Stop Description</td><td>St. Joseph's Ch</td></tr>
            </table>
        "#;

        let record = parse_lookup_page(html);
        assert_eq!(record.road_name.as_deref(), Some("Victoria St"));
        assert_eq!(record.description.as_deref(), Some("St. Joseph's Ch"));
    }

    #[test]
    fn a_header_label_echoed_as_a_value_is_discarded() {
        let html = r#"
            <table>
                <tr><th>Road Name</th><th>Bus Stop Description</th></tr>
                <tr><td>Road Name</td><td>Bus Stop Description</td></tr>
            </table>
        "#;

        let record = parse_lookup_page(html);
        assert!(record.road_name.is_none());
        assert!(record.description.is_none());
        assert!(!record.is_success());
    }

    #[test]
    fn unrelated_pages_yield_an_empty_record() {
        let record = parse_lookup_page("<html><body><p>No such stop.</p></body></html>");
        assert!(!record.is_success());

        let menu_only = parse_lookup_page(
            "<table><tr><td>About</td><td>Contact</td><td>FAQ</td></tr></table>",
        );
        assert!(!menu_only.is_success());
    }

    #[test]
    fn nested_markup_and_whitespace_flatten_into_one_value() {
        let html = r#"
            <table>
                <tr><th>Road Name</th><th>Bus Stop Description</th></tr>
                <tr>
                    <td>  Victoria
                        St </td>
                    <td><strong>Hotel</strong> Grand Pacific</td>
                </tr>
            </table>
        "#;

        let record = parse_lookup_page(html);
        assert_eq!(record.road_name.as_deref(), Some("Victoria St"));
        assert_eq!(record.description.as_deref(), Some("Hotel Grand Pacific"));
    }

    #[test]
    fn a_lone_road_name_still_counts_as_an_answer() {
        let html = r#"
            <table>
                <tr><td>Road Name</td><td>Sims Ave</td></tr>
                <tr><td>Bus Stop Description</td><td></td></tr>
            </table>
        "#;

        let record = parse_lookup_page(html);
        assert_eq!(record.road_name.as_deref(), Some("Sims Ave"));
        assert!(record.description.is_none());
        assert!(record.is_success());
    }

    #[test]
    fn the_first_productive_table_wins() {
        let html = r#"
            <table><tr><td>Road Name</td><td>Correct Rd</td></tr></table>
            <table><tr><td>Road Name</td><td>Wrong Rd</td></tr></table>
        "#;

        let record = parse_lookup_page(html);
        assert_eq!(record.road_name.as_deref(), Some("Correct Rd"));
    }
}
