//! Port traits. API boundaries for the hexagon.
//!
//! - Outbound: Called by the application into infrastructure (sheets, storage, notifications)

pub mod outbound;

pub use outbound::{
    GridFetcher, IngestionStateStore, NotificationSink, ScheduleStore, ScheduleTx, SnapshotStore,
};
