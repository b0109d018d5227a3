//! Batch report for the tolerant parsers.
//!
//! Row-level defects never abort a parse; each one is recorded here so callers (and tests)
//! can see exactly what was dropped and why without scraping logs.

use serde::Serialize;
use std::fmt;

/// Semantic role of a column in the corrections table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Group,
    Date,
    TimeStart,
    TimeEnd,
    Subject,
    Teacher,
    Classroom,
    ChangeKind,
    OriginalSubject,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnRole::Group => "group",
            ColumnRole::Date => "date",
            ColumnRole::TimeStart => "time_start",
            ColumnRole::TimeEnd => "time_end",
            ColumnRole::Subject => "subject",
            ColumnRole::Teacher => "teacher",
            ColumnRole::Classroom => "classroom",
            ColumnRole::ChangeKind => "change_kind",
            ColumnRole::OriginalSubject => "original_subject",
        }
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a row (or one group's cell block in a row) was skipped or flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    ShortRow { len: usize, expected: usize },
    EmptyOrdinal,
    BadOrdinal { value: String },
    ColumnOutOfRange { start: usize },
    /// Day marker without an extractable weekday; following lessons get no times.
    UnknownWeekday { value: String },
    /// Day marker whose date failed to parse; the weekday was still applied.
    DayMarkerDate { value: String },
    /// Lesson emitted with empty times (warning, record kept).
    UnresolvedTime { weekday: Option<String>, ordinal: u32 },
    UnparseableDate { value: String },
    UnknownChangeKind { value: String },
    MissingGroupOrSubject,
    MissingStartTime,
    /// Time cell that is not `HH:MM` (warning, record kept verbatim).
    MalformedTime { role: ColumnRole, value: String },
}

impl SkipReason {
    /// Warnings accompany a record that was still emitted; everything else dropped data.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            SkipReason::DayMarkerDate { .. }
                | SkipReason::UnresolvedTime { .. }
                | SkipReason::MalformedTime { .. }
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ShortRow { len, expected } => {
                write!(f, "row has {} cells, expected at least {}", len, expected)
            }
            SkipReason::EmptyOrdinal => f.write_str("empty lesson number"),
            SkipReason::BadOrdinal { value } => write!(f, "bad lesson number '{}'", value),
            SkipReason::ColumnOutOfRange { start } => {
                write!(f, "column block at {} out of range", start)
            }
            SkipReason::UnknownWeekday { value } => write!(f, "no weekday in '{}'", value),
            SkipReason::DayMarkerDate { value } => write!(f, "unparseable day date '{}'", value),
            SkipReason::UnresolvedTime { weekday, ordinal } => write!(
                f,
                "no bell time for lesson {} on {}",
                ordinal,
                weekday.as_deref().unwrap_or("unknown day")
            ),
            SkipReason::UnparseableDate { value } => write!(f, "unparseable date '{}'", value),
            SkipReason::UnknownChangeKind { value } => {
                write!(f, "unknown change kind '{}'", value)
            }
            SkipReason::MissingGroupOrSubject => f.write_str("empty group or subject"),
            SkipReason::MissingStartTime => f.write_str("empty start time"),
            SkipReason::MalformedTime { role, value } => {
                write!(f, "malformed {} '{}'", role, value)
            }
        }
    }
}

/// Outcome of one row (or one group's block).
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome<T> {
    Accepted(T),
    Skipped(SkipReason),
}

/// A recorded defect: 0-based grid row, optional group, and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub group: Option<String>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Accepted records plus every issue met along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseReport<T> {
    pub records: Vec<T>,
    pub issues: Vec<RowIssue>,
}

impl<T> Default for ParseReport<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            issues: Vec::new(),
        }
    }
}

impl<T> ParseReport<T> {
    /// Fold a row outcome into the report.
    pub fn push(&mut self, row: usize, group: Option<&str>, outcome: RowOutcome<T>) {
        match outcome {
            RowOutcome::Accepted(record) => self.records.push(record),
            RowOutcome::Skipped(reason) => self.issue(row, group, reason),
        }
    }

    pub fn issue(&mut self, row: usize, group: Option<&str>, reason: SkipReason) {
        self.issues.push(RowIssue {
            row,
            group: group.map(str::to_string),
            reason,
        });
    }

    /// Issues that actually dropped data.
    pub fn skipped(&self) -> impl Iterator<Item = &RowIssue> {
        self.issues.iter().filter(|i| !i.reason.is_warning())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_routes_outcomes() {
        let mut report = ParseReport::default();
        report.push(3, None, RowOutcome::Accepted(7));
        report.push(4, Some("G1"), RowOutcome::Skipped(SkipReason::EmptyOrdinal));
        report.issue(
            5,
            None,
            SkipReason::UnresolvedTime {
                weekday: None,
                ordinal: 2,
            },
        );

        assert_eq!(report.records, vec![7]);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].group.as_deref(), Some("G1"));
        assert_eq!(report.skipped().count(), 1);
    }

    #[test]
    fn issue_serializes_flat() {
        let issue = RowIssue {
            row: 2,
            group: None,
            reason: SkipReason::UnknownChangeKind {
                value: "перенос".into(),
            },
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["reason"], "unknown_change_kind");
        assert_eq!(json["value"], "перенос");
        assert_eq!(json["row"], 2);
    }
}
