//! Notification sink that writes notices to the log.

use super::message::{change_notice, timetable_notice};
use crate::domain::{Change, DomainError, ScheduleSnapshot};
use crate::ports::NotificationSink;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationSink for LogNotifier {
    async fn notify_change(&self, change: &Change) -> Result<(), DomainError> {
        let notice = change_notice(change);
        info!(
            group = %change.group_name,
            kind = %change.kind,
            title = %notice.title,
            "{}",
            notice.message
        );
        Ok(())
    }

    async fn notify_new_timetable(&self, snapshot: &ScheduleSnapshot) -> Result<(), DomainError> {
        let notice = timetable_notice(snapshot);
        info!(snapshot = %snapshot.id, title = %notice.title, "{}", notice.message);
        Ok(())
    }
}
