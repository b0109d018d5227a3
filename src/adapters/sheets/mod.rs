//! Spreadsheet sources. Implement GridFetcher.

pub mod csv_grid;
pub mod file_fetcher;
pub mod http_fetcher;

pub use file_fetcher::FileSheetFetcher;
pub use http_fetcher::HttpSheetFetcher;

use crate::domain::DomainError;
use crate::ports::GridFetcher;

/// Routes `http(s)://` sources to [`HttpSheetFetcher`] and everything else to
/// [`FileSheetFetcher`], so the two sheets may live in different places.
pub struct SheetSource {
    http: HttpSheetFetcher,
    file: FileSheetFetcher,
}

impl SheetSource {
    pub fn new(http: HttpSheetFetcher) -> Self {
        Self {
            http,
            file: FileSheetFetcher::new(),
        }
    }
}

fn is_http(source_url: &str) -> bool {
    let lower = source_url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait::async_trait]
impl GridFetcher for SheetSource {
    async fn fetch_grid(&self, source_url: &str) -> Result<Vec<Vec<String>>, DomainError> {
        if is_http(source_url) {
            self.http.fetch_grid(source_url).await
        } else {
            self.file.fetch_grid(source_url).await
        }
    }
}
