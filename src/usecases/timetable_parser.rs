//! Structural parser for the wide weekly timetable export.
//!
//! Layout of the grid:
//! - row 0: metadata (ignored)
//! - row 1: group names from column 1 onwards
//! - rows 2-3: spacer
//! - row 4: sub-column header, four columns per group (subject, lesson type, teacher, room)
//! - row 5..: day markers (`День - <Weekday>, <DD.MM.YYYY>`) interleaved with lesson rows
//!   (`<ordinal>, 4 × groups cells`)
//!
//! Lesson times are resolved from the bell schedule using the weekday of the last day marker.

use crate::domain::bell_schedule;
use crate::domain::{DomainError, Lesson, ParseReport, RowOutcome, SkipReason};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

const COLUMNS_PER_GROUP: usize = 4;
const GROUPS_ROW: usize = 1;
const HEADER_ROW: usize = 4;
const BODY_START: usize = 5;
const MIN_ROWS: usize = 5;

/// Slot offsets inside a group's block. Slot 1 (lesson type) is not used.
const SUBJECT_SLOT: usize = 0;
const TEACHER_SLOT: usize = 2;
const ROOM_SLOT: usize = 3;

/// Day state carried between rows.
#[derive(Debug, Default, Clone)]
struct DayState {
    weekday: Option<String>,
    date: Option<NaiveDate>,
}

/// Parse a wide-format timetable grid into lessons.
///
/// Fails with [`DomainError::MalformedLayout`] (and emits nothing) when the grid has fewer than
/// five rows, no group names in row 1, or a header row narrower than `4 × groups`.
/// Row-level defects are skipped and reported.
pub fn parse_timetable(grid: &[Vec<String>]) -> Result<ParseReport<Lesson>, DomainError> {
    if grid.len() < MIN_ROWS {
        return Err(DomainError::MalformedLayout(format!(
            "expected at least {} rows, got {}",
            MIN_ROWS,
            grid.len()
        )));
    }

    let groups = group_names(&grid[GROUPS_ROW]);
    if groups.is_empty() {
        return Err(DomainError::MalformedLayout(
            "group row (row 1) has no group names".into(),
        ));
    }

    let header_needed = COLUMNS_PER_GROUP * groups.len();
    if grid[HEADER_ROW].len() < header_needed {
        return Err(DomainError::MalformedLayout(format!(
            "header row (row 4) has {} columns, expected at least {}",
            grid[HEADER_ROW].len(),
            header_needed
        )));
    }
    debug!(groups = ?groups, "timetable groups");

    let expected_len = 1 + header_needed;
    let mut report = ParseReport::default();
    let mut day = DayState::default();

    for (idx, row) in grid.iter().enumerate().skip(BODY_START) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        if let Some(marker) = row.first().and_then(|c| day_marker_body(c)) {
            day = apply_day_marker(marker, idx, &mut report);
            continue;
        }

        if row.len() < expected_len {
            warn!(
                row = idx,
                len = row.len(),
                expected = expected_len,
                "short timetable row, skipping"
            );
            report.issue(
                idx,
                None,
                SkipReason::ShortRow {
                    len: row.len(),
                    expected: expected_len,
                },
            );
            continue;
        }

        let ordinal = match parse_ordinal(&row[0]) {
            Ok(n) => n,
            Err(reason) => {
                warn!(row = idx, %reason, "skipping timetable row");
                report.issue(idx, None, reason);
                continue;
            }
        };

        let times = day
            .weekday
            .as_deref()
            .and_then(|w| bell_schedule::lookup(w, ordinal));

        let before = report.records.len();
        for (g, group) in groups.iter().enumerate() {
            let start = 1 + g * COLUMNS_PER_GROUP;
            if let Some(outcome) = lesson_from_block(row, start, group, &day, times) {
                if let RowOutcome::Skipped(reason) = &outcome {
                    warn!(row = idx, group = %group, %reason, "skipping group cells");
                }
                report.push(idx, Some(group.as_str()), outcome);
            }
        }

        if times.is_none() && report.records.len() > before {
            warn!(
                row = idx,
                ordinal,
                weekday = day.weekday.as_deref().unwrap_or("unknown"),
                "no bell time; lessons keep empty times"
            );
            report.issue(
                idx,
                None,
                SkipReason::UnresolvedTime {
                    weekday: day.weekday.clone(),
                    ordinal,
                },
            );
        }
    }

    info!(
        lessons = report.records.len(),
        issues = report.issues.len(),
        groups = groups.len(),
        "parsed timetable"
    );
    Ok(report)
}

/// Non-empty, trimmed names from column 1 onwards (column 0 holds the row label).
fn group_names(row: &[String]) -> Vec<String> {
    row.iter()
        .skip(1)
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// For `День - Понедельник, 23.06.2025` returns `Понедельник, 23.06.2025`.
fn day_marker_body(cell: &str) -> Option<&str> {
    let trimmed = cell.trim();
    let prefix_end = trimmed
        .char_indices()
        .nth(4)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    if trimmed[..prefix_end].to_lowercase() != "день" {
        return None;
    }
    let rest = trimmed[prefix_end..].trim_start();
    rest.strip_prefix('-')
        .or_else(|| rest.strip_prefix('–'))
        .map(str::trim)
}

fn apply_day_marker(
    body: &str,
    row: usize,
    report: &mut ParseReport<Lesson>,
) -> DayState {
    let (weekday_part, date_part) = match body.split_once(',') {
        Some((w, d)) => (w.trim(), d.trim()),
        None => match body.split_once(char::is_whitespace) {
            Some((w, d)) => (w.trim(), d.trim()),
            None => (body, ""),
        },
    };

    let weekday = Some(weekday_part)
        .filter(|w| !w.is_empty() && w.chars().all(char::is_alphabetic))
        .map(str::to_string);
    if weekday.is_none() {
        warn!(row, marker = body, "day marker without weekday; times unresolved until next marker");
        report.issue(
            row,
            None,
            SkipReason::UnknownWeekday {
                value: body.to_string(),
            },
        );
    }

    let date = match NaiveDate::parse_from_str(date_part, "%d.%m.%Y") {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(row, date = date_part, error = %e, "unparseable day marker date");
            report.issue(
                row,
                None,
                SkipReason::DayMarkerDate {
                    value: date_part.to_string(),
                },
            );
            None
        }
    };

    debug!(row, weekday = ?weekday, date = ?date, "day marker");
    DayState { weekday, date }
}

fn parse_ordinal(cell: &str) -> Result<u32, SkipReason> {
    let value = cell.trim();
    if value.is_empty() {
        return Err(SkipReason::EmptyOrdinal);
    }
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(SkipReason::BadOrdinal {
            value: value.to_string(),
        }),
    }
}

/// `None` when the group has no subject in this row (no lesson, not a defect).
fn lesson_from_block(
    row: &[String],
    start: usize,
    group: &str,
    day: &DayState,
    times: Option<(&str, &str)>,
) -> Option<RowOutcome<Lesson>> {
    let Some(block) = row.get(start..start + COLUMNS_PER_GROUP) else {
        return Some(RowOutcome::Skipped(SkipReason::ColumnOutOfRange { start }));
    };

    let subject = block[SUBJECT_SLOT].trim();
    if subject.is_empty() {
        return None;
    }

    let (time_start, time_end) = times.unwrap_or(("", ""));
    Some(RowOutcome::Accepted(Lesson {
        group_name: group.to_string(),
        subject: subject.to_string(),
        teacher: block[TEACHER_SLOT].trim().to_string(),
        classroom: block[ROOM_SLOT].trim().to_string(),
        day_of_week: day.weekday.clone().unwrap_or_default(),
        time_start: time_start.to_string(),
        time_end: time_end.to_string(),
        date: day.date,
    }))
}
