//! Google Sheets CSV export over HTTP. Implements GridFetcher.

use super::csv_grid::decode_grid;
use crate::domain::DomainError;
use crate::ports::GridFetcher;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const EXPORT_URL: &str = "https://docs.google.com/spreadsheets/d";

/// Sheets answers bare clients with a sign-in page instead of the export.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fetches published sheets as CSV.
pub struct HttpSheetFetcher {
    client: Client,
}

impl HttpSheetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DomainError::Fetch(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Turn a sheet link into its CSV export URL, keeping the tab (`gid`, default 0).
/// Links that are not Google Sheets links are used as they are.
pub fn export_url(source_url: &str) -> Result<String, DomainError> {
    let id_re = Regex::new(r"/spreadsheets/d/([^/?#]+)")
        .map_err(|e| DomainError::Fetch(e.to_string()))?;
    let Some(id) = id_re.captures(source_url).and_then(|c| c.get(1)) else {
        return Ok(source_url.to_string());
    };
    if source_url.contains("format=csv") {
        return Ok(source_url.to_string());
    }

    let gid_re = Regex::new(r"[#?&]gid=(\d+)").map_err(|e| DomainError::Fetch(e.to_string()))?;
    let gid = gid_re
        .captures(source_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("0");

    Ok(format!(
        "{}/{}/export?format=csv&gid={}",
        EXPORT_URL,
        id.as_str(),
        gid
    ))
}

#[async_trait::async_trait]
impl GridFetcher for HttpSheetFetcher {
    async fn fetch_grid(&self, source_url: &str) -> Result<Vec<Vec<String>>, DomainError> {
        let url = export_url(source_url)?;
        debug!(%url, "fetching sheet export");

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::Fetch(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(DomainError::Fetch(format!(
                "Sheet export error {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let bytes = res
            .bytes()
            .await
            .map_err(|e| DomainError::Fetch(format!("read body: {}", e)))?;
        let grid = decode_grid(&bytes)?;
        debug!(%url, rows = grid.len(), "fetched sheet");
        Ok(grid)
    }
}
