//! Application use cases. Parsers, change detection, merge engine, orchestration.

pub mod correction_parser;
pub mod fingerprint;
pub mod ingestion_service;
pub mod merge_service;
pub mod schedule_query;
pub mod timetable_parser;

pub use correction_parser::{parse_corrections, ChangeKindPolicy};
pub use fingerprint::fingerprint;
pub use ingestion_service::{
    CorrectionsOutcome, IngestionService, IngestionSettings, TimetableOutcome,
};
pub use merge_service::{MergeFailure, MergeReport, MergeService};
pub use schedule_query::ScheduleQueryService;
pub use timetable_parser::parse_timetable;
