//! Human-readable notices shared by the notification adapters.

use crate::domain::{Change, ChangeKind, ScheduleSnapshot};
use chrono::NaiveDate;
use serde::Serialize;

const DATE_FMT: &str = "%d.%m.%Y";

/// Rendered notice. Serialized as the webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub date: NaiveDate,
}

fn with_teacher(subject: &str, teacher: &str) -> String {
    if teacher.is_empty() {
        subject.to_string()
    } else {
        format!("{} ({})", subject, teacher)
    }
}

fn room_suffix(classroom: &str) -> String {
    if classroom.is_empty() {
        String::new()
    } else {
        format!(", room {}", classroom)
    }
}

pub fn change_notice(change: &Change) -> Notice {
    let lesson = with_teacher(&change.subject, &change.teacher);
    let room = room_suffix(&change.classroom);
    let message = match change.kind {
        ChangeKind::Replacement if !change.original_subject.is_empty() => format!(
            "{} at {} replaces {}{}",
            lesson, change.time_start, change.original_subject, room
        ),
        ChangeKind::Replacement => {
            format!("Replacement at {}: {}{}", change.time_start, lesson, room)
        }
        ChangeKind::Cancellation => format!("{} at {} is cancelled", lesson, change.time_start),
        ChangeKind::Addition => {
            format!("Extra lesson at {}: {}{}", change.time_start, lesson, room)
        }
    };
    Notice {
        title: format!(
            "Timetable changes for {} on {}",
            change.group_name,
            change.date.format(DATE_FMT)
        ),
        message,
        group: Some(change.group_name.clone()),
        date: change.date,
    }
}

pub fn timetable_notice(snapshot: &ScheduleSnapshot) -> Notice {
    Notice {
        title: "Timetable updated".to_string(),
        message: format!(
            "New timetable for {} to {} ({} lessons)",
            snapshot.period_start.format(DATE_FMT),
            snapshot.period_end.format(DATE_FMT),
            snapshot.lessons.len()
        ),
        group: None,
        date: snapshot.period_start,
    }
}
