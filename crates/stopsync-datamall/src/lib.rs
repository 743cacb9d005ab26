//! LTA DataMall client, the authority for the current stop catalog.
//!
//! The BusStops endpoint pages in fixed `$skip` strides; an empty page
//! marks the end of the catalog. Transport failures and error statuses are
//! retried per page with a linearly growing delay. A page that stays
//! unfetchable makes the whole catalog unavailable: a partial catalog must
//! never pose as a snapshot, since every stop missing from it would be
//! diffed as removed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use stopsync_catalog::{CatalogSource, RawStopRecord, SourceError};

const DEFAULT_BASE_URL: &str = "https://datamall2.mytransport.sg/ltaodataservice";
const ACCOUNT_KEY_HEADER: &str = "AccountKey";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct DataMallConfig {
    pub base_url: String,
    /// API key sent as the `AccountKey` header on every request.
    pub account_key: String,
    /// Fixed page stride of the BusStops endpoint.
    pub page_size: usize,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub retry_delay: Duration,
    /// Pause between consecutive pages.
    pub page_delay: Duration,
}

impl DataMallConfig {
    pub fn new(account_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            account_key: account_key.into(),
            page_size: 500,
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            page_delay: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct BusStopPage {
    #[serde(default)]
    value: Vec<BusStopEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct BusStopEntry {
    #[serde(rename = "BusStopCode")]
    code: String,
    #[serde(rename = "RoadName", default)]
    road_name: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Latitude", default)]
    latitude: f64,
    #[serde(rename = "Longitude", default)]
    longitude: f64,
}

impl From<BusStopEntry> for RawStopRecord {
    fn from(entry: BusStopEntry) -> Self {
        Self {
            code: entry.code,
            name: entry.description,
            street: entry.road_name,
            lat: entry.latitude,
            lon: entry.longitude,
        }
    }
}

fn page_url(base_url: &str, skip: usize) -> String {
    format!("{}/BusStops?$skip={skip}", base_url.trim_end_matches('/'))
}

enum PageError {
    /// Worth another attempt: connect/read failures and error statuses.
    Transient(String),
    /// The endpoint answered with something that is not a bus stop page.
    Malformed(String),
}

// ============================================================================
// Client
// ============================================================================

pub struct DataMallClient {
    client: Client,
    config: DataMallConfig,
}

impl DataMallClient {
    pub fn new(config: DataMallConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build http client");
        Self { client, config }
    }

    async fn request_page(&self, url: &str) -> Result<BusStopPage, PageError> {
        let response = self
            .client
            .get(url)
            .header(ACCOUNT_KEY_HEADER, &self.config.account_key)
            .send()
            .await
            .map_err(|err| PageError::Transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PageError::Transient(format!("http status {status}: {body}")));
        }

        response
            .json::<BusStopPage>()
            .await
            .map_err(|err| PageError::Malformed(err.to_string()))
    }

    async fn fetch_page(&self, skip: usize) -> Result<Vec<BusStopEntry>, SourceError> {
        let url = page_url(&self.config.base_url, skip);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.request_page(&url).await {
                Ok(page) => return Ok(page.value),
                Err(PageError::Malformed(reason)) => {
                    return Err(SourceError::MalformedResponse(reason));
                }
                Err(PageError::Transient(reason)) => {
                    warn!(skip, attempt, error = %reason, "page fetch failed");
                    last_error = reason;
                }
            }
            if attempt < max_attempts {
                sleep(self.config.retry_delay * attempt).await;
            }
        }

        Err(SourceError::Unavailable {
            attempts: max_attempts,
            reason: last_error,
        })
    }
}

#[async_trait]
impl CatalogSource for DataMallClient {
    async fn fetch_current(&self) -> Result<Vec<RawStopRecord>, SourceError> {
        let mut stops: Vec<RawStopRecord> = Vec::new();
        let mut skip = 0usize;
        let mut pages = 0usize;

        loop {
            let entries = self.fetch_page(skip).await?;
            if entries.is_empty() {
                break;
            }
            pages += 1;
            debug!(skip, fetched = entries.len(), "page fetched");
            stops.extend(entries.into_iter().map(RawStopRecord::from));
            skip += self.config.page_size;
            sleep(self.config.page_delay).await;
        }

        info!(stops = stops.len(), pages, "catalog fetched");
        Ok(stops)
    }
}

// ============================================================================
// Tests
// ============================================================================
