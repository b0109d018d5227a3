//! Local CSV exports. Implements GridFetcher for offline runs and replays.

use super::csv_grid::decode_grid;
use crate::domain::DomainError;
use crate::ports::GridFetcher;
use std::path::PathBuf;

/// Reads `file://` URLs or plain paths.
#[derive(Debug, Default, Clone)]
pub struct FileSheetFetcher;

impl FileSheetFetcher {
    pub fn new() -> Self {
        Self
    }

    fn path_of(source_url: &str) -> PathBuf {
        PathBuf::from(source_url.strip_prefix("file://").unwrap_or(source_url))
    }
}

#[async_trait::async_trait]
impl GridFetcher for FileSheetFetcher {
    async fn fetch_grid(&self, source_url: &str) -> Result<Vec<Vec<String>>, DomainError> {
        let path = Self::path_of(source_url);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| DomainError::Fetch(format!("read {}: {}", path.display(), e)))?;
        decode_grid(&bytes)
    }
}
