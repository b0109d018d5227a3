//! In-memory store. Implements ScheduleStore and SnapshotStore.
//!
//! Transactions hold the row lock for their whole lifetime and stage writes on a copy, so an
//! uncommitted transaction leaves no trace. Used by tests and dry runs.

use crate::domain::{CurrentScheduleEntry, DomainError, EntryKey, ScheduleSnapshot};
use crate::ports::{ScheduleStore, ScheduleTx, SnapshotStore};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryRepo {
    rows: Arc<Mutex<Vec<CurrentScheduleEntry>>>,
    snapshots: Mutex<Vec<ScheduleSnapshot>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed row, active or not.
    pub async fn rows(&self) -> Vec<CurrentScheduleEntry> {
        self.rows.lock().await.clone()
    }

    pub async fn snapshots(&self) -> Vec<ScheduleSnapshot> {
        self.snapshots.lock().await.clone()
    }
}

struct MemoryTx {
    committed: OwnedMutexGuard<Vec<CurrentScheduleEntry>>,
    staged: Vec<CurrentScheduleEntry>,
}

#[async_trait::async_trait]
impl ScheduleStore for MemoryRepo {
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, DomainError> {
        let committed = self.rows.clone().lock_owned().await;
        let staged = committed.clone();
        Ok(Box::new(MemoryTx { committed, staged }))
    }

    async fn current_for_group(
        &self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<Vec<CurrentScheduleEntry>, DomainError> {
        let rows = self.rows.lock().await;
        let mut day: Vec<_> = rows
            .iter()
            .filter(|e| e.is_active && e.group_name == group_name && e.date == date)
            .cloned()
            .collect();
        day.sort_by(|a, b| a.time_start.cmp(&b.time_start));
        Ok(day)
    }
}

#[async_trait::async_trait]
impl ScheduleTx for MemoryTx {
    async fn find_by_key(
        &mut self,
        key: &EntryKey,
    ) -> Result<Option<CurrentScheduleEntry>, DomainError> {
        Ok(self.staged.iter().find(|e| e.key() == *key).cloned())
    }

    async fn insert(&mut self, entry: &CurrentScheduleEntry) -> Result<(), DomainError> {
        let key = entry.key();
        if self.staged.iter().any(|e| e.key() == key) {
            return Err(DomainError::Repo(format!("duplicate key {}", key)));
        }
        self.staged.push(entry.clone());
        Ok(())
    }

    async fn update(&mut self, entry: &CurrentScheduleEntry) -> Result<(), DomainError> {
        match self.staged.iter_mut().find(|e| e.id == entry.id) {
            Some(row) => {
                *row = entry.clone();
                Ok(())
            }
            None => Err(DomainError::Repo(format!("no row with id {}", entry.id))),
        }
    }

    async fn deactivate_day(
        &mut self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<u64, DomainError> {
        let mut count = 0;
        for row in self
            .staged
            .iter_mut()
            .filter(|e| e.is_active && e.group_name == group_name && e.date == date)
        {
            row.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let MemoryTx {
            mut committed,
            staged,
        } = *self;
        *committed = staged;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryRepo {
    async fn save_snapshot(&self, snapshot: &ScheduleSnapshot) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.lock().await;
        snapshots.retain(|s| s.id != snapshot.id);
        snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn get_active_snapshot(&self) -> Result<Option<ScheduleSnapshot>, DomainError> {
        let snapshots = self.snapshots.lock().await;
        Ok(snapshots
            .iter()
            .filter(|s| s.is_active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn deactivate_snapshot(&self, id: Uuid) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.lock().await;
        match snapshots.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.is_active = false;
                Ok(())
            }
            None => Err(DomainError::Repo(format!("no snapshot {}", id))),
        }
    }
}
