//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    Change, CurrentScheduleEntry, DomainError, EntryKey, IngestionState, ScheduleSnapshot,
};
use chrono::NaiveDate;
use uuid::Uuid;

/// Raw spreadsheet export source. Returns text cells row by row; rows may differ in length.
#[async_trait::async_trait]
pub trait GridFetcher: Send + Sync {
    async fn fetch_grid(&self, source_url: &str) -> Result<Vec<Vec<String>>, DomainError>;
}

/// Current-schedule storage. All writes go through a [`ScheduleTx`].
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Open a transaction. Dropping the handle without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, DomainError>;

    /// Active rows for a group on a date, ordered by start time.
    async fn current_for_group(
        &self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<Vec<CurrentScheduleEntry>, DomainError>;
}

/// Transaction handle over the current schedule.
#[async_trait::async_trait]
pub trait ScheduleTx: Send {
    /// Row at the natural key, active or not.
    async fn find_by_key(
        &mut self,
        key: &EntryKey,
    ) -> Result<Option<CurrentScheduleEntry>, DomainError>;

    async fn insert(&mut self, entry: &CurrentScheduleEntry) -> Result<(), DomainError>;

    /// Overwrite the row with `entry.id`.
    async fn update(&mut self, entry: &CurrentScheduleEntry) -> Result<(), DomainError>;

    /// Flag every active row of `group_name` on `date` inactive. Returns the number flagged.
    async fn deactivate_day(
        &mut self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<u64, DomainError>;

    async fn commit(self: Box<Self>) -> Result<(), DomainError>;
}

/// Snapshot storage.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &ScheduleSnapshot) -> Result<(), DomainError>;

    /// Most recent active snapshot, if any.
    async fn get_active_snapshot(&self) -> Result<Option<ScheduleSnapshot>, DomainError>;

    async fn deactivate_snapshot(&self, id: Uuid) -> Result<(), DomainError>;
}

/// Delivery of change / new-timetable notices. Best effort: callers log failures and go on.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_change(&self, change: &Change) -> Result<(), DomainError>;

    async fn notify_new_timetable(&self, snapshot: &ScheduleSnapshot) -> Result<(), DomainError>;
}

/// Durable copy of the corrections bookkeeping, so restarts neither re-merge nor re-notify.
#[async_trait::async_trait]
pub trait IngestionStateStore: Send + Sync {
    /// Default state when nothing was stored yet.
    async fn load(&self) -> Result<IngestionState, DomainError>;

    async fn store(&self, state: &IngestionState) -> Result<(), DomainError>;
}
