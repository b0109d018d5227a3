//! Read side of the current schedule.

use crate::domain::{CurrentScheduleEntry, DomainError};
use crate::ports::ScheduleStore;
use chrono::NaiveDate;
use std::sync::Arc;

pub struct ScheduleQueryService {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleQueryService {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// Active lessons for `group` on `date`, earliest first. Group names are matched trimmed.
    pub async fn day(
        &self,
        group: &str,
        date: NaiveDate,
    ) -> Result<Vec<CurrentScheduleEntry>, DomainError> {
        self.store.current_for_group(group.trim(), date).await
    }

    /// Active lessons for `group` over `from..=to`, grouped by day. Days without lessons are
    /// left out.
    pub async fn range(
        &self,
        group: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Vec<CurrentScheduleEntry>)>, DomainError> {
        let mut days = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let lessons = self.day(group, date).await?;
            if !lessons.is_empty() {
                days.push((date, lessons));
            }
        }
        Ok(days)
    }
}
