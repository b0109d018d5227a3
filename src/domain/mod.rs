//! Core domain layer. No external I/O dependencies.
//!
//! Entities, the bell table and parse-report vocabulary live here. Dependencies flow inward.

pub mod bell_schedule;
pub mod entities;
pub mod errors;
pub mod report;

pub use entities::{
    Change, ChangeKind, ChangeSetFingerprint, CurrentScheduleEntry, EntryKey, IngestionState,
    Lesson, ProvenanceTag, ScheduleSnapshot,
};
pub use errors::DomainError;
pub use report::{ColumnRole, ParseReport, RowIssue, RowOutcome, SkipReason};
