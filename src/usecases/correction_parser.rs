//! Tolerant parser for the corrections table.
//!
//! Column names drift between revisions of the sheet, so the header is resolved by substring
//! against a rule table (role → needles) instead of exact names. Dates accept three formats;
//! change kinds go through a fixed vocabulary.

use crate::domain::{
    Change, ChangeKind, ColumnRole, DomainError, ParseReport, RowOutcome, SkipReason,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What to do with change-kind text outside the vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKindPolicy {
    /// Drop the row.
    #[default]
    Strict,
    /// Treat it as a replacement.
    Lenient,
}

/// Rules are applied in order and each column is claimed by at most one role, so the more
/// specific roles come first ("Оригинальный предмет" must not be taken as the subject).
const ROLE_RULES: &[(ColumnRole, &[&str])] = &[
    (ColumnRole::OriginalSubject, &["оригинальн", "исходн", "original"]),
    // "change" alone would also claim "Change date".
    (ColumnRole::ChangeKind, &["тип", "вид изменения", "change type", "kind", "type"]),
    (ColumnRole::TimeStart, &["начал", "start"]),
    (ColumnRole::TimeEnd, &["оконч", "конец", "end"]),
    (ColumnRole::Group, &["групп", "group"]),
    (ColumnRole::Date, &["дата", "date"]),
    (ColumnRole::Subject, &["предмет", "дисциплин", "subject"]),
    (ColumnRole::Teacher, &["преподав", "учител", "teacher"]),
    (ColumnRole::Classroom, &["аудитор", "кабинет", "ауд", "room"]),
];

const REQUIRED_ROLES: &[ColumnRole] = &[
    ColumnRole::Group,
    ColumnRole::Date,
    ColumnRole::TimeStart,
    ColumnRole::Subject,
];

const DATE_FORMATS: &[&str] = &["%d.%m.%Y", "%Y-%m-%d", "%m/%d/%Y"];

const TIME_FORMATS: &[&str] = &["%H:%M", "%H.%M", "%H:%M:%S"];

const KIND_VOCABULARY: &[(&str, ChangeKind)] = &[
    ("замена", ChangeKind::Replacement),
    ("replacement", ChangeKind::Replacement),
    ("replace", ChangeKind::Replacement),
    ("отмена", ChangeKind::Cancellation),
    ("cancellation", ChangeKind::Cancellation),
    ("cancel", ChangeKind::Cancellation),
    ("cancelled", ChangeKind::Cancellation),
    ("canceled", ChangeKind::Cancellation),
    ("добавление", ChangeKind::Addition),
    ("addition", ChangeKind::Addition),
    ("add", ChangeKind::Addition),
    ("added", ChangeKind::Addition),
];

/// Resolved role → column index for one header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    indices: HashMap<ColumnRole, usize>,
}

impl ColumnMap {
    /// Resolve header cells against [`ROLE_RULES`]. Case-insensitive substring match.
    pub fn resolve(header: &[String]) -> Self {
        let normalized: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut claimed = vec![false; normalized.len()];
        let mut indices = HashMap::new();

        for (role, needles) in ROLE_RULES {
            let found = normalized.iter().enumerate().find(|(i, name)| {
                !claimed[*i] && !name.is_empty() && needles.iter().any(|n| name.contains(n))
            });
            if let Some((i, _)) = found {
                claimed[i] = true;
                indices.insert(*role, i);
            }
        }
        Self { indices }
    }

    pub fn get(&self, role: ColumnRole) -> Option<usize> {
        self.indices.get(&role).copied()
    }

    pub fn missing_required(&self) -> Vec<ColumnRole> {
        REQUIRED_ROLES
            .iter()
            .copied()
            .filter(|r| !self.indices.contains_key(r))
            .collect()
    }

    /// Highest resolved index; rows must reach it to be considered.
    pub fn max_index(&self) -> usize {
        self.indices.values().copied().max().unwrap_or(0)
    }
}

/// Parse the corrections grid (row 0 = header).
///
/// Fails with [`DomainError::MalformedLayout`] on an empty grid and
/// [`DomainError::MissingColumns`] when a required role does not resolve. A header with no
/// data rows is a valid, empty correction set.
pub fn parse_corrections(
    grid: &[Vec<String>],
    policy: ChangeKindPolicy,
) -> Result<ParseReport<Change>, DomainError> {
    let Some(header) = grid.first() else {
        return Err(DomainError::MalformedLayout(
            "corrections table has no header row".into(),
        ));
    };

    let columns = ColumnMap::resolve(header);
    let missing = columns.missing_required();
    if !missing.is_empty() {
        return Err(DomainError::MissingColumns(missing));
    }
    debug!(columns = ?columns, "resolved correction columns");

    let mut report = ParseReport::default();
    for (idx, row) in grid.iter().enumerate().skip(1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        match parse_row(row, &columns, policy, idx, &mut report) {
            RowOutcome::Accepted(change) => report.records.push(change),
            RowOutcome::Skipped(reason) => {
                let group = cell(row, columns.get(ColumnRole::Group)).to_string();
                warn!(row = idx, group = %group, %reason, "skipping correction row");
                let group = Some(group.as_str()).filter(|g| !g.is_empty());
                report.issue(idx, group, reason);
            }
        }
    }

    info!(
        changes = report.records.len(),
        issues = report.issues.len(),
        "parsed corrections"
    );
    Ok(report)
}

/// Trimmed cell text; empty when the role is unresolved or the row is too short.
fn cell(row: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| row.get(i))
        .map(|c| c.trim())
        .unwrap_or("")
}

fn parse_row(
    row: &[String],
    columns: &ColumnMap,
    policy: ChangeKindPolicy,
    idx: usize,
    report: &mut ParseReport<Change>,
) -> RowOutcome<Change> {
    if row.len() <= columns.max_index() {
        return RowOutcome::Skipped(SkipReason::ShortRow {
            len: row.len(),
            expected: columns.max_index() + 1,
        });
    }

    let raw_date = cell(row, columns.get(ColumnRole::Date));
    let Some(date) = parse_date(raw_date) else {
        return RowOutcome::Skipped(SkipReason::UnparseableDate {
            value: raw_date.to_string(),
        });
    };

    let raw_kind = cell(row, columns.get(ColumnRole::ChangeKind));
    let kind = match (parse_kind(raw_kind), policy) {
        (Some(kind), _) => kind,
        (None, ChangeKindPolicy::Lenient) => {
            debug!(row = idx, kind = raw_kind, "unknown change kind, treating as replacement");
            ChangeKind::Replacement
        }
        (None, ChangeKindPolicy::Strict) => {
            return RowOutcome::Skipped(SkipReason::UnknownChangeKind {
                value: raw_kind.to_string(),
            });
        }
    };

    let group_name = cell(row, columns.get(ColumnRole::Group));
    let subject = cell(row, columns.get(ColumnRole::Subject));
    if group_name.is_empty() || subject.is_empty() {
        return RowOutcome::Skipped(SkipReason::MissingGroupOrSubject);
    }
    // The start time is part of the row key; without it changes would collapse onto one row.
    if cell(row, columns.get(ColumnRole::TimeStart)).is_empty() {
        return RowOutcome::Skipped(SkipReason::MissingStartTime);
    }

    let time_start = checked_time(row, columns, ColumnRole::TimeStart, idx, report);
    let time_end = checked_time(row, columns, ColumnRole::TimeEnd, idx, report);
    let original_subject = match kind {
        ChangeKind::Replacement => cell(row, columns.get(ColumnRole::OriginalSubject)),
        _ => "",
    };

    RowOutcome::Accepted(Change {
        group_name: group_name.to_string(),
        date,
        time_start,
        time_end,
        subject: subject.to_string(),
        teacher: cell(row, columns.get(ColumnRole::Teacher)).to_string(),
        classroom: cell(row, columns.get(ColumnRole::Classroom)).to_string(),
        kind,
        original_subject: original_subject.to_string(),
    })
}

/// First format that parses wins.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
}

pub fn parse_kind(value: &str) -> Option<ChangeKind> {
    let v = value.trim().to_lowercase();
    KIND_VOCABULARY
        .iter()
        .find(|(word, _)| *word == v)
        .map(|&(_, kind)| kind)
}

/// `H:MM`-like values become `HH:MM`; anything else is kept verbatim.
pub fn normalize_time(value: &str) -> Option<String> {
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(value, f).ok())
        .map(|t| t.format("%H:%M").to_string())
}

fn checked_time(
    row: &[String],
    columns: &ColumnMap,
    role: ColumnRole,
    idx: usize,
    report: &mut ParseReport<Change>,
) -> String {
    let raw = cell(row, columns.get(role));
    if raw.is_empty() {
        return String::new();
    }
    match normalize_time(raw) {
        Some(t) => t,
        None => {
            warn!(row = idx, %role, value = raw, "malformed time kept verbatim");
            report.issue(
                idx,
                None,
                SkipReason::MalformedTime {
                    role,
                    value: raw.to_string(),
                },
            );
            raw.to_string()
        }
    }
}
