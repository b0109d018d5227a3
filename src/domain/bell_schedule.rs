//! Bell schedule: lesson number → (start, end) per weekday.
//!
//! Hand-authored from the college's posted bell timetable. Monday–Friday share one table,
//! Saturday runs on the shortened one. Sunday has no lessons.

/// (lesson number, start, end)
type Bell = (u32, &'static str, &'static str);

const WEEKDAY_BELLS: &[Bell] = &[
    (1, "08:15", "09:00"),
    (2, "09:00", "09:45"),
    (3, "09:55", "10:40"),
    (4, "10:40", "11:25"),
    (5, "11:40", "12:25"),
    (6, "12:25", "13:10"),
    (7, "13:30", "14:15"),
    (8, "14:15", "15:00"),
    (9, "15:15", "16:00"),
    (10, "16:00", "16:45"),
    (11, "16:55", "17:40"),
    (12, "17:40", "18:25"),
];

const SATURDAY_BELLS: &[Bell] = &[
    (1, "08:15", "09:00"),
    (2, "09:00", "09:45"),
    (3, "09:50", "10:35"),
    (4, "10:35", "11:20"),
    (5, "11:35", "12:20"),
    (6, "12:20", "13:05"),
    (7, "13:20", "14:05"),
    (8, "14:05", "14:50"),
    (9, "15:05", "15:50"),
    (10, "15:50", "16:35"),
    (11, "16:40", "17:25"),
    (12, "17:25", "18:10"),
];

const STANDARD_DAYS: &[&str] = &[
    "понедельник",
    "вторник",
    "среда",
    "четверг",
    "пятница",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
];

const SATURDAY: &[&str] = &["суббота", "saturday"];

fn table_for(weekday: &str) -> Option<&'static [Bell]> {
    let day = weekday.trim().to_lowercase();
    if STANDARD_DAYS.contains(&day.as_str()) {
        Some(WEEKDAY_BELLS)
    } else if SATURDAY.contains(&day.as_str()) {
        Some(SATURDAY_BELLS)
    } else {
        None
    }
}

/// Start/end of lesson `ordinal` (1-based) on `weekday`. `None` means "unresolved":
/// the caller keeps the lesson with empty times.
pub fn lookup(weekday: &str, ordinal: u32) -> Option<(&'static str, &'static str)> {
    table_for(weekday)?
        .iter()
        .find(|(n, _, _)| *n == ordinal)
        .map(|&(_, start, end)| (start, end))
}
