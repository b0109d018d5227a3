//! Merge engine: upserts corrections (and accepted snapshots) into the current schedule.
//!
//! - One transaction per call
//! - Best effort per record: a failed record is logged and counted, the rest still commit
//! - Upserts by natural key (group, date, start time), never by surrogate id

use crate::domain::{
    Change, ChangeKind, CurrentScheduleEntry, DomainError, EntryKey, ProvenanceTag,
    ScheduleSnapshot,
};
use crate::ports::{ScheduleStore, ScheduleTx};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one merge call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    /// Rows flagged inactive by a snapshot replace.
    pub deactivated: u64,
    /// Lessons without a date or bell time; not materializable.
    pub skipped: usize,
    pub failed: Vec<MergeFailure>,
}

impl MergeReport {
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// A record that could not be written. `index` points into the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upserted {
    Inserted,
    Updated,
}

/// Sole writer of current-schedule rows.
pub struct MergeService {
    store: Arc<dyn ScheduleStore>,
}

impl MergeService {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// Apply corrections in one transaction.
    ///
    /// Cancellations flag the slot inactive; other kinds leave the flag as it was (new rows
    /// start active). Errors are returned only for begin/commit; per-change storage errors
    /// land in [`MergeReport::failed`].
    pub async fn apply(&self, changes: &[Change]) -> Result<MergeReport, DomainError> {
        let mut tx = self.store.begin().await?;
        let mut report = MergeReport::default();

        for (index, change) in changes.iter().enumerate() {
            match apply_change(tx.as_mut(), change).await {
                Ok(Upserted::Inserted) => report.inserted += 1,
                Ok(Upserted::Updated) => report.updated += 1,
                Err(e) => {
                    warn!(index, key = %change.key(), error = %e, "failed to apply change");
                    report.failed.push(MergeFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;
        info!(
            applied = report.applied(),
            total = changes.len(),
            failed = report.failed.len(),
            "applied changes to current schedule"
        );
        Ok(report)
    }

    /// Replace the covered days of the current schedule with a snapshot's lessons.
    ///
    /// Every active row of each (group, date) the snapshot covers is flagged inactive, then
    /// each lesson is upserted as an active `from-timetable` row. Lessons with no date or
    /// no resolved time are skipped.
    pub async fn materialize_snapshot(
        &self,
        snapshot: &ScheduleSnapshot,
    ) -> Result<MergeReport, DomainError> {
        let mut report = MergeReport::default();
        let mut rows = Vec::with_capacity(snapshot.lessons.len());

        for (index, lesson) in snapshot.lessons.iter().enumerate() {
            match lesson.date {
                Some(date) if lesson.has_resolved_time() => rows.push((
                    index,
                    CurrentScheduleEntry {
                        id: Uuid::new_v4(),
                        group_name: lesson.group_name.clone(),
                        date,
                        time_start: lesson.time_start.clone(),
                        time_end: lesson.time_end.clone(),
                        subject: lesson.subject.clone(),
                        teacher: lesson.teacher.clone(),
                        classroom: lesson.classroom.clone(),
                        provenance: ProvenanceTag::FromTimetable,
                        provenance_ref: snapshot.id.to_string(),
                        is_active: true,
                    },
                )),
                _ => report.skipped += 1,
            }
        }

        let days: BTreeSet<(String, chrono::NaiveDate)> = rows
            .iter()
            .map(|(_, e)| (e.group_name.clone(), e.date))
            .collect();

        let mut tx = self.store.begin().await?;
        for (group, date) in &days {
            report.deactivated += tx.deactivate_day(group, *date).await?;
        }

        for (index, entry) in rows {
            let key = entry.key();
            match upsert(tx.as_mut(), &key, entry, |existing, fresh| {
                existing.time_end = fresh.time_end.clone();
                existing.is_active = true;
            })
            .await
            {
                Ok(Upserted::Inserted) => report.inserted += 1,
                Ok(Upserted::Updated) => report.updated += 1,
                Err(e) => {
                    warn!(index, %key, error = %e, "failed to materialize lesson");
                    report.failed.push(MergeFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;
        info!(
            snapshot = %snapshot.id,
            days = days.len(),
            inserted = report.inserted,
            updated = report.updated,
            deactivated = report.deactivated,
            skipped = report.skipped,
            failed = report.failed.len(),
            "materialized snapshot"
        );
        Ok(report)
    }
}

async fn apply_change(tx: &mut dyn ScheduleTx, change: &Change) -> Result<Upserted, DomainError> {
    let cancelled = change.kind == ChangeKind::Cancellation;
    let key = change.key();
    let fresh = CurrentScheduleEntry {
        id: Uuid::new_v4(),
        group_name: change.group_name.clone(),
        date: change.date,
        time_start: change.time_start.clone(),
        time_end: change.time_end.clone(),
        subject: change.subject.clone(),
        teacher: change.teacher.clone(),
        classroom: change.classroom.clone(),
        provenance: ProvenanceTag::FromCorrection,
        provenance_ref: change.identity(),
        is_active: !cancelled,
    };

    upsert(tx, &key, fresh, |existing, fresh| {
        if !fresh.time_end.is_empty() {
            existing.time_end = fresh.time_end.clone();
        }
        if cancelled {
            existing.is_active = false;
        }
    })
    .await
}

/// Insert `fresh`, or copy its content columns and provenance onto the row at `key`.
/// `adjust` applies caller-specific tweaks (end time, active flag) to the existing row.
async fn upsert<F>(
    tx: &mut dyn ScheduleTx,
    key: &EntryKey,
    fresh: CurrentScheduleEntry,
    adjust: F,
) -> Result<Upserted, DomainError>
where
    F: FnOnce(&mut CurrentScheduleEntry, &CurrentScheduleEntry) + Send,
{
    match tx.find_by_key(key).await? {
        Some(mut existing) => {
            existing.subject = fresh.subject.clone();
            existing.teacher = fresh.teacher.clone();
            existing.classroom = fresh.classroom.clone();
            existing.provenance = fresh.provenance;
            existing.provenance_ref = fresh.provenance_ref.clone();
            adjust(&mut existing, &fresh);
            tx.update(&existing).await?;
            debug!(%key, id = %existing.id, "updated entry");
            Ok(Upserted::Updated)
        }
        None => {
            tx.insert(&fresh).await?;
            debug!(%key, id = %fresh.id, "inserted entry");
            Ok(Upserted::Inserted)
        }
    }
}
