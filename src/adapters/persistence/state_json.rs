//! Implements IngestionStateStore using a JSON file.
//!
//! Keeps the last accepted correction fingerprint and the notified changes across restarts.

use crate::domain::{DomainError, IngestionState};
use crate::ports::IngestionStateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateData {
    #[serde(flatten)]
    state: IngestionState,
    updated_at: Option<DateTime<Utc>>,
}

/// JSON file-based state storage.
pub struct StateJson {
    path: PathBuf,
}

impl StateJson {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Atomic save: write temp file, sync, rename over the target.
    async fn save(&self, data: &StateData) -> Result<(), DomainError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| DomainError::State(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::State(format!("create state dir: {}", e)))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::State(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::State(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::State(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DomainError::State(format!("atomic rename failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngestionStateStore for StateJson {
    /// A missing file is an empty state; a corrupt one is logged and treated as empty, which
    /// costs one redundant merge at most.
    async fn load(&self) -> Result<IngestionState, DomainError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(IngestionState::default());
            }
            Err(e) => return Err(DomainError::State(format!("read state: {}", e))),
        };
        match serde_json::from_str::<StateData>(&raw) {
            Ok(data) => Ok(data.state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, ignoring");
                Ok(IngestionState::default())
            }
        }
    }

    async fn store(&self, state: &IngestionState) -> Result<(), DomainError> {
        self.save(&StateData {
            state: state.clone(),
            updated_at: Some(Utc::now()),
        })
        .await
    }
}
