//! Ingestion orchestrator: two periodic jobs over the parsers and the merge engine.
//!
//! - Timetable: fetch -> structural parse -> materialize -> snapshot swap -> notify
//! - Corrections: fetch -> correction parse -> fingerprint gate -> merge -> notify new changes
//!
//! Each tick spawns the cycle as its own task under a deadline, so a stuck cycle never holds
//! the timer. A tick that finds the previous cycle of the same job still running is skipped.

use crate::domain::{Change, DomainError, IngestionState, Lesson, ScheduleSnapshot};
use crate::ports::{GridFetcher, IngestionStateStore, NotificationSink, SnapshotStore};
use crate::usecases::correction_parser::{parse_corrections, ChangeKindPolicy};
use crate::usecases::fingerprint::fingerprint;
use crate::usecases::merge_service::{MergeReport, MergeService};
use crate::usecases::timetable_parser::parse_timetable;
use chrono::{Datelike, Days, Local, NaiveDate, Utc, Weekday};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default snapshot period when no lesson carries a date.
const DEFAULT_PERIOD_DAYS: u64 = 7;

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Timing and source settings for the two jobs.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub timetable_url: String,
    pub corrections_url: String,
    /// How often the timetable job wakes up. With a weekday gate this is only the polling
    /// interval; the gate allows one successful run per designated day.
    pub timetable_period: Duration,
    /// Only re-ingest the timetable on this weekday (after the startup run). `None` = every tick.
    pub timetable_day: Option<Weekday>,
    pub corrections_period: Duration,
    pub cycle_timeout: Duration,
    pub change_kind_policy: ChangeKindPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Timetable,
    Corrections,
}

impl Job {
    fn as_str(&self) -> &'static str {
        match self {
            Job::Timetable => "timetable",
            Job::Corrections => "corrections",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimetableOutcome {
    /// Parsed fine but had no lessons; the active snapshot was left alone.
    Empty,
    Replaced {
        snapshot_id: Uuid,
        lessons: usize,
        issues: usize,
        merge: MergeReport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionsOutcome {
    /// Same fingerprint as the last accepted set; nothing merged or sent.
    Unchanged,
    Applied {
        changes: usize,
        issues: usize,
        /// Notices delivered this cycle. Changes already announced are not sent again.
        notified: usize,
        merge: MergeReport,
    },
}

pub struct IngestionService {
    fetcher: Arc<dyn GridFetcher>,
    snapshots: Arc<dyn SnapshotStore>,
    merge: Arc<MergeService>,
    notifier: Arc<dyn NotificationSink>,
    state_store: Option<Arc<dyn IngestionStateStore>>,
    /// Shared by both jobs: the timetable job clears the fingerprint.
    state: Mutex<IngestionState>,
    /// Local date of the last successful timetable run.
    last_timetable_run: Mutex<Option<NaiveDate>>,
    clock: Clock,
    settings: IngestionSettings,
}

impl IngestionService {
    pub fn new(
        fetcher: Arc<dyn GridFetcher>,
        snapshots: Arc<dyn SnapshotStore>,
        merge: Arc<MergeService>,
        notifier: Arc<dyn NotificationSink>,
        state_store: Option<Arc<dyn IngestionStateStore>>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            fetcher,
            snapshots,
            merge,
            notifier,
            state_store,
            state: Mutex::new(IngestionState::default()),
            last_timetable_run: Mutex::new(None),
            clock: Box::new(|| Local::now().date_naive()),
            settings,
        }
    }

    /// Replace the local-date source used by the weekday gate and snapshot naming.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Load the persisted state, if a store is configured. Call once before `run`.
    pub async fn restore_state(&self) -> Result<(), DomainError> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };
        let stored = store.load().await?;
        if let Some(fp) = &stored.last_fingerprint {
            info!(
                fingerprint = %fp,
                notified = stored.notified.len(),
                "restored corrections state"
            );
        }
        *self.state.lock().await = stored;
        Ok(())
    }

    /// Run both jobs until `cancel` fires, then wait for in-flight cycles.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            timetable_secs = self.settings.timetable_period.as_secs(),
            timetable_day = ?self.settings.timetable_day,
            corrections_secs = self.settings.corrections_period.as_secs(),
            "ingestion started"
        );
        tokio::join!(
            self.clone().schedule_loop(Job::Timetable, cancel.clone()),
            self.clone().schedule_loop(Job::Corrections, cancel),
        );
        info!("ingestion stopped");
    }

    async fn schedule_loop(self: Arc<Self>, job: Job, cancel: CancellationToken) {
        let period = match job {
            Job::Timetable => self.settings.timetable_period,
            Job::Corrections => self.settings.corrections_period,
        };
        if period.is_zero() {
            error!(job = job.as_str(), "period is zero, job disabled");
            return;
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;
        let mut startup = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let first = std::mem::replace(&mut startup, false);
            if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                warn!(job = job.as_str(), "previous cycle still running, skipping tick");
                continue;
            }
            if !first && !self.is_due(job).await {
                debug!(job = job.as_str(), "not due, skipping tick");
                continue;
            }

            let this = self.clone();
            in_flight = Some(tokio::spawn(async move { this.guarded_cycle(job).await }));
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!(job = job.as_str(), error = %e, "cycle task panicked");
            }
        }
        info!(job = job.as_str(), "job stopped");
    }

    /// With a weekday gate the timetable is due on that weekday until one run succeeds, so
    /// a failed run is retried on the next tick of the same day.
    async fn is_due(&self, job: Job) -> bool {
        let (Job::Timetable, Some(day)) = (job, self.settings.timetable_day) else {
            return true;
        };
        let today = (self.clock)();
        today.weekday() == day && *self.last_timetable_run.lock().await != Some(today)
    }

    /// One cycle under the deadline. Never returns an error: everything is logged here.
    async fn guarded_cycle(&self, job: Job) {
        let work = async {
            match job {
                Job::Timetable => self.run_timetable_cycle().await.map(|_| ()),
                Job::Corrections => self.run_corrections_cycle().await.map(|_| ()),
            }
        };
        match tokio::time::timeout(self.settings.cycle_timeout, work).await {
            Ok(Ok(())) => {
                if job == Job::Timetable {
                    *self.last_timetable_run.lock().await = Some((self.clock)());
                }
            }
            Ok(Err(e)) => error!(job = job.as_str(), error = %e, "cycle failed"),
            Err(_) => {
                let e = DomainError::Timeout {
                    secs: self.settings.cycle_timeout.as_secs(),
                };
                error!(job = job.as_str(), error = %e, "cycle aborted");
            }
        }
    }

    /// Fetch and parse the timetable, materialize it, then make it the active snapshot.
    ///
    /// The snapshot is only saved once materializing succeeded, so a failed cycle leaves the
    /// previous snapshot active and matching the current schedule.
    pub async fn run_timetable_cycle(&self) -> Result<TimetableOutcome, DomainError> {
        let url = &self.settings.timetable_url;
        let grid = self.fetcher.fetch_grid(url).await?;
        let report = parse_timetable(&grid)?;
        let issues = report.issues.len();
        if report.records.is_empty() {
            warn!(issues, "timetable has no lessons, keeping the active snapshot");
            return Ok(TimetableOutcome::Empty);
        }

        let snapshot = build_snapshot(report.records, url, (self.clock)());

        // Held until the fingerprint is cleared, so a corrections cycle cannot slip in between.
        let mut state = self.state.lock().await;
        let previous = self.snapshots.get_active_snapshot().await?;
        let merge = self.merge.materialize_snapshot(&snapshot).await?;

        // Materializing may have overwritten correction rows; re-apply corrections next cycle.
        state.last_fingerprint = None;
        self.persist_state(&state).await;
        drop(state);

        self.snapshots.save_snapshot(&snapshot).await?;
        if let Some(prev) = previous.filter(|p| p.id != snapshot.id) {
            if let Err(e) = self.snapshots.deactivate_snapshot(prev.id).await {
                warn!(snapshot = %prev.id, error = %e, "failed to deactivate previous snapshot");
            }
        }

        if let Err(e) = self.notifier.notify_new_timetable(&snapshot).await {
            warn!(error = %e, "new timetable notification failed");
        }

        info!(
            snapshot = %snapshot.id,
            name = %snapshot.name,
            lessons = snapshot.lessons.len(),
            issues,
            "timetable ingested"
        );
        Ok(TimetableOutcome::Replaced {
            snapshot_id: snapshot.id,
            lessons: snapshot.lessons.len(),
            issues,
            merge,
        })
    }

    /// Fetch and parse corrections; merge unless the set is unchanged, then announce the
    /// changes nobody was told about yet.
    ///
    /// The fingerprint is only recorded when every change was written, so partial failures
    /// are retried on the next cycle (the merge is idempotent). Failed writes and failed
    /// deliveries are not marked as notified.
    pub async fn run_corrections_cycle(&self) -> Result<CorrectionsOutcome, DomainError> {
        let grid = self
            .fetcher
            .fetch_grid(&self.settings.corrections_url)
            .await?;
        let report = parse_corrections(&grid, self.settings.change_kind_policy)?;
        let fp = fingerprint(&report.records);

        let mut state = self.state.lock().await;
        if state.last_fingerprint.as_ref() == Some(&fp) {
            debug!(fingerprint = %fp, "no new corrections");
            return Ok(CorrectionsOutcome::Unchanged);
        }

        let merge = self.merge.apply(&report.records).await?;
        if merge.failed.is_empty() {
            state.last_fingerprint = Some(fp.clone());
        } else {
            warn!(
                failed = merge.failed.len(),
                "some changes failed, fingerprint left unset for retry"
            );
        }

        let failed: HashSet<usize> = merge.failed.iter().map(|f| f.index).collect();
        let mut pending: Vec<(String, &Change)> = Vec::new();
        for (index, change) in report.records.iter().enumerate() {
            let identity = change.identity();
            if failed.contains(&index)
                || state.notified.contains(&identity)
                || pending.iter().any(|(id, _)| *id == identity)
            {
                continue;
            }
            pending.push((identity, change));
        }
        drop(state);

        let mut delivered = Vec::with_capacity(pending.len());
        for (identity, change) in pending {
            match self.notifier.notify_change(change).await {
                Ok(()) => delivered.push(identity),
                Err(e) => warn!(key = %change.key(), error = %e, "change notification failed"),
            }
        }
        let notified = delivered.len();

        let mut state = self.state.lock().await;
        // Changes that left the sheet are forgotten, which keeps the set bounded.
        let current: HashSet<String> = report.records.iter().map(Change::identity).collect();
        state.notified.retain(|id| current.contains(id));
        state.notified.extend(delivered);
        self.persist_state(&state).await;
        drop(state);

        info!(
            changes = report.records.len(),
            applied = merge.applied(),
            notified,
            issues = report.issues.len(),
            fingerprint = %fp,
            "corrections ingested"
        );
        Ok(CorrectionsOutcome::Applied {
            changes: report.records.len(),
            issues: report.issues.len(),
            notified,
            merge,
        })
    }

    async fn persist_state(&self, state: &IngestionState) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.store(state).await {
                warn!(error = %e, "failed to persist corrections state");
            }
        }
    }
}

/// New active snapshot over `lessons`. The period spans the lesson dates, or `today` plus a
/// week when no lesson is dated.
pub fn build_snapshot(lessons: Vec<Lesson>, source_url: &str, today: NaiveDate) -> ScheduleSnapshot {
    let dates = lessons.iter().filter_map(|l| l.date);
    let (start, end) = match (dates.clone().min(), dates.max()) {
        (Some(start), Some(end)) => (start, end),
        _ => (
            today,
            today
                .checked_add_days(Days::new(DEFAULT_PERIOD_DAYS))
                .unwrap_or(today),
        ),
    };
    ScheduleSnapshot {
        id: Uuid::new_v4(),
        name: format!("Timetable from {}", start.format("%d.%m.%Y")),
        period_start: start,
        period_end: end,
        lessons,
        source_url: source_url.to_string(),
        created_at: Utc::now(),
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::{MemoryRepo, StateJson};
    use crate::domain::{CurrentScheduleEntry, ProvenanceTag};
    use crate::ports::{ScheduleStore, ScheduleTx};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const TIMETABLE: &str = "mem://timetable";
    const CORRECTIONS: &str = "mem://corrections";

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn timetable_grid(subject: &str) -> Vec<Vec<String>> {
        vec![
            row(&["Расписание занятий"]),
            row(&["Группы - ", "G1"]),
            row(&[""]),
            row(&[""]),
            row(&["", "Предмет", "вид занятия", "преподаватель", "Ауд."]),
            row(&["День - Понедельник, 23.06.2025"]),
            row(&["1", subject, "lecture", "Smith", "101"]),
        ]
    }

    fn corrections_grid(kind: &str) -> Vec<Vec<String>> {
        vec![
            row(&["Группа", "Дата", "Время начала", "Предмет", "Тип изменения"]),
            row(&["G1", "23.06.2025", "08:15", "Physics", kind]),
        ]
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 23).unwrap()
    }

    /// Serves fixed grids per URL; grids can be swapped between cycles.
    #[derive(Default)]
    struct StaticFetcher {
        grids: std::sync::Mutex<HashMap<String, Vec<Vec<String>>>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn set(&self, url: &str, grid: Vec<Vec<String>>) {
            self.grids.lock().unwrap().insert(url.to_string(), grid);
        }
    }

    #[async_trait::async_trait]
    impl GridFetcher for StaticFetcher {
        async fn fetch_grid(&self, source_url: &str) -> Result<Vec<Vec<String>>, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.grids
                .lock()
                .unwrap()
                .get(source_url)
                .cloned()
                .ok_or_else(|| DomainError::Fetch(format!("404 {}", source_url)))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn notify_change(&self, change: &Change) -> Result<(), DomainError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("change:{}:{}", change.group_name, change.kind));
            Ok(())
        }

        async fn notify_new_timetable(
            &self,
            snapshot: &ScheduleSnapshot,
        ) -> Result<(), DomainError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("timetable:{}", snapshot.name));
            // Failures must not abort the cycle.
            Err(DomainError::Notify("push gateway down".into()))
        }
    }

    struct Harness {
        repo: Arc<MemoryRepo>,
        fetcher: Arc<StaticFetcher>,
        notifier: Arc<RecordingNotifier>,
        service: Arc<IngestionService>,
    }

    fn settings() -> IngestionSettings {
        IngestionSettings {
            timetable_url: TIMETABLE.into(),
            corrections_url: CORRECTIONS.into(),
            timetable_period: Duration::from_secs(3600),
            timetable_day: None,
            corrections_period: Duration::from_secs(3600),
            cycle_timeout: Duration::from_secs(5),
            change_kind_policy: ChangeKindPolicy::Strict,
        }
    }

    fn build(
        fetcher: StaticFetcher,
        state: Option<Arc<dyn IngestionStateStore>>,
        settings: IngestionSettings,
        configure: impl FnOnce(IngestionService) -> IngestionService,
    ) -> Harness {
        let repo = Arc::new(MemoryRepo::new());
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(configure(IngestionService::new(
            fetcher.clone(),
            repo.clone(),
            Arc::new(MergeService::new(repo.clone())),
            notifier.clone(),
            state,
            settings,
        )));
        Harness {
            repo,
            fetcher,
            notifier,
            service,
        }
    }

    fn harness_with(
        fetcher: StaticFetcher,
        state: Option<Arc<dyn IngestionStateStore>>,
        settings: IngestionSettings,
    ) -> Harness {
        build(fetcher, state, settings, |s| s)
    }

    fn harness() -> Harness {
        harness_with(StaticFetcher::default(), None, settings())
    }

    fn change_notices(notifier: &RecordingNotifier) -> usize {
        notifier
            .sent()
            .iter()
            .filter(|s| s.starts_with("change:"))
            .count()
    }

    /// Delegates to a [`MemoryRepo`] until switched off; then every transaction fails to open.
    struct SwitchableStore {
        inner: Arc<MemoryRepo>,
        broken: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ScheduleStore for SwitchableStore {
        async fn begin(&self) -> Result<Box<dyn ScheduleTx>, DomainError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(DomainError::Repo("database is locked".into()));
            }
            self.inner.begin().await
        }

        async fn current_for_group(
            &self,
            group_name: &str,
            date: NaiveDate,
        ) -> Result<Vec<CurrentScheduleEntry>, DomainError> {
            self.inner.current_for_group(group_name, date).await
        }
    }

    #[tokio::test]
    async fn unchanged_corrections_skip_merge_and_notification() {
        let h = harness();
        h.fetcher.set(CORRECTIONS, corrections_grid("замена"));

        let first = h.service.run_corrections_cycle().await.unwrap();
        assert!(matches!(first, CorrectionsOutcome::Applied { changes: 1, .. }));
        assert_eq!(h.notifier.sent(), vec!["change:G1:replacement"]);

        let second = h.service.run_corrections_cycle().await.unwrap();
        assert_eq!(second, CorrectionsOutcome::Unchanged);
        assert_eq!(h.notifier.sent().len(), 1);

        h.fetcher.set(CORRECTIONS, corrections_grid("отмена"));
        let third = h.service.run_corrections_cycle().await.unwrap();
        assert!(matches!(third, CorrectionsOutcome::Applied { .. }));
        assert_eq!(h.notifier.sent().len(), 2);
        assert!(h.repo.current_for_group("G1", monday()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_and_layout_errors_surface_to_the_caller() {
        let h = harness();
        assert!(matches!(
            h.service.run_corrections_cycle().await,
            Err(DomainError::Fetch(_))
        ));

        h.fetcher.set(CORRECTIONS, vec![row(&["Группа", "Предмет"])]);
        assert!(matches!(
            h.service.run_corrections_cycle().await,
            Err(DomainError::MissingColumns(_))
        ));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn timetable_cycle_swaps_snapshot_and_resets_fingerprint() {
        let h = harness();
        h.fetcher.set(TIMETABLE, timetable_grid("Math"));
        h.fetcher.set(CORRECTIONS, corrections_grid("замена"));

        // Correction first, then the timetable overwrites the same slot.
        h.service.run_corrections_cycle().await.unwrap();
        let first = h.service.run_timetable_cycle().await.unwrap();
        let TimetableOutcome::Replaced {
            snapshot_id: first_id,
            lessons,
            merge,
            ..
        } = first
        else {
            panic!("expected a new snapshot");
        };
        assert_eq!(lessons, 1);
        assert_eq!(merge.updated, 1);

        let day = h.repo.current_for_group("G1", monday()).await.unwrap();
        assert_eq!(day[0].subject, "Math");
        assert_eq!(day[0].provenance, ProvenanceTag::FromTimetable);

        // Same corrections again: fingerprint was cleared, so they are re-applied.
        let again = h.service.run_corrections_cycle().await.unwrap();
        assert!(matches!(again, CorrectionsOutcome::Applied { .. }));
        let day = h.repo.current_for_group("G1", monday()).await.unwrap();
        assert_eq!(day[0].subject, "Physics");

        // A second timetable leaves exactly one active snapshot.
        h.fetcher.set(TIMETABLE, timetable_grid("History"));
        h.service.run_timetable_cycle().await.unwrap();
        let snapshots = h.repo.snapshots().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots.iter().filter(|s| s.is_active).count(), 1);
        assert!(snapshots.iter().any(|s| s.id == first_id && !s.is_active));

        let sent = h.notifier.sent();
        assert!(sent.contains(&"timetable:Timetable from 23.06.2025".to_string()));
    }

    #[tokio::test]
    async fn empty_timetable_keeps_the_active_snapshot() {
        let h = harness();
        h.fetcher.set(TIMETABLE, timetable_grid("Math"));
        h.service.run_timetable_cycle().await.unwrap();

        h.fetcher.set(TIMETABLE, timetable_grid(""));
        let outcome = h.service.run_timetable_cycle().await.unwrap();
        assert_eq!(outcome, TimetableOutcome::Empty);
        assert_eq!(h.repo.snapshots().await.len(), 1);
        assert!(h.repo.get_active_snapshot().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn persisted_fingerprint_survives_restart() {
        let dir = TempDir::new().unwrap();
        let state: Arc<dyn IngestionStateStore> =
            Arc::new(StateJson::new(dir.path().join("s.json")));

        let first = harness_with(StaticFetcher::default(), Some(state.clone()), settings());
        first.fetcher.set(CORRECTIONS, corrections_grid("замена"));
        first.service.run_corrections_cycle().await.unwrap();

        let second = harness_with(StaticFetcher::default(), Some(state), settings());
        second.fetcher.set(CORRECTIONS, corrections_grid("замена"));
        second.service.restore_state().await.unwrap();
        assert_eq!(
            second.service.run_corrections_cycle().await.unwrap(),
            CorrectionsOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn reapplied_corrections_are_not_announced_twice() {
        let dir = TempDir::new().unwrap();
        let state: Arc<dyn IngestionStateStore> =
            Arc::new(StateJson::new(dir.path().join("state.json")));
        let h = harness_with(StaticFetcher::default(), Some(state.clone()), settings());
        h.fetcher.set(TIMETABLE, timetable_grid("Math"));
        h.fetcher.set(CORRECTIONS, corrections_grid("замена"));

        h.service.run_corrections_cycle().await.unwrap();
        h.service.run_timetable_cycle().await.unwrap();
        let again = h.service.run_corrections_cycle().await.unwrap();
        assert!(matches!(again, CorrectionsOutcome::Applied { notified: 0, .. }));
        assert_eq!(change_notices(&h.notifier), 1);
        let day = h.repo.current_for_group("G1", monday()).await.unwrap();
        assert_eq!(day[0].subject, "Physics");

        // The notified set is persisted: a restart after the next timetable stays quiet too.
        h.service.run_timetable_cycle().await.unwrap();
        let restarted = harness_with(StaticFetcher::default(), Some(state), settings());
        restarted.fetcher.set(CORRECTIONS, corrections_grid("замена"));
        restarted.service.restore_state().await.unwrap();
        let outcome = restarted.service.run_corrections_cycle().await.unwrap();
        assert!(matches!(outcome, CorrectionsOutcome::Applied { notified: 0, .. }));
        assert_eq!(change_notices(&restarted.notifier), 0);

        // A genuinely new change is still announced.
        restarted.fetcher.set(CORRECTIONS, corrections_grid("отмена"));
        restarted.service.run_corrections_cycle().await.unwrap();
        assert_eq!(change_notices(&restarted.notifier), 1);
    }

    #[tokio::test]
    async fn failed_materialization_keeps_the_previous_snapshot_active() {
        let repo = Arc::new(MemoryRepo::new());
        let store = Arc::new(SwitchableStore {
            inner: repo.clone(),
            broken: AtomicBool::new(false),
        });
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set(TIMETABLE, timetable_grid("Math"));
        let service = IngestionService::new(
            fetcher.clone(),
            repo.clone(),
            Arc::new(MergeService::new(store.clone())),
            Arc::new(RecordingNotifier::default()),
            None,
            settings(),
        );

        let TimetableOutcome::Replaced { snapshot_id, .. } =
            service.run_timetable_cycle().await.unwrap()
        else {
            panic!("expected a new snapshot");
        };

        store.broken.store(true, Ordering::SeqCst);
        fetcher.set(TIMETABLE, timetable_grid("History"));
        assert!(matches!(
            service.run_timetable_cycle().await,
            Err(DomainError::Repo(_))
        ));

        let active = repo.get_active_snapshot().await.unwrap().unwrap();
        assert_eq!(active.id, snapshot_id);
        assert_eq!(repo.snapshots().await.len(), 1);
        let day = repo.current_for_group("G1", monday()).await.unwrap();
        assert_eq!(day[0].subject, "Math");

        store.broken.store(false, Ordering::SeqCst);
        service.run_timetable_cycle().await.unwrap();
        let active = repo.get_active_snapshot().await.unwrap().unwrap();
        assert_ne!(active.id, snapshot_id);
        assert_eq!(active.lessons[0].subject, "History");
    }

    #[tokio::test(start_paused = true)]
    async fn weekday_gate_ingests_once_on_each_designated_day() {
        let fetcher = StaticFetcher::default();
        fetcher.set(TIMETABLE, timetable_grid("Math"));
        fetcher.set(CORRECTIONS, corrections_grid("замена"));

        // Starts on a Monday; virtual days pass with the paused tokio clock.
        let origin = tokio::time::Instant::now();
        let h = build(
            fetcher,
            None,
            IngestionSettings {
                timetable_period: Duration::from_secs(3600),
                timetable_day: Some(Weekday::Tue),
                corrections_period: Duration::from_secs(365 * 86_400),
                cycle_timeout: Duration::from_secs(60),
                ..settings()
            },
            move |s| {
                s.with_clock(move || monday() + Days::new(origin.elapsed().as_secs() / 86_400))
            },
        );

        let cancel = CancellationToken::new();
        let running = tokio::spawn(h.service.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(27 * 86_400)).await;
        cancel.cancel();
        running.await.unwrap();

        // Startup run plus the Tuesdays of days 1, 8, 15 and 22; hourly ticks in between skip.
        assert_eq!(h.repo.snapshots().await.len(), 5);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn snapshot_period_follows_lesson_dates() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let lesson = |date| Lesson {
            group_name: "G1".into(),
            subject: "Math".into(),
            teacher: String::new(),
            classroom: String::new(),
            day_of_week: String::new(),
            time_start: String::new(),
            time_end: String::new(),
            date,
        };

        let dated = build_snapshot(
            vec![
                lesson(NaiveDate::from_ymd_opt(2025, 6, 25)),
                lesson(None),
                lesson(Some(monday())),
            ],
            TIMETABLE,
            today,
        );
        assert_eq!(dated.period_start, monday());
        assert_eq!(dated.period_end, NaiveDate::from_ymd_opt(2025, 6, 25).unwrap());
        assert_eq!(dated.name, "Timetable from 23.06.2025");
        assert!(dated.is_active);

        let undated = build_snapshot(vec![lesson(None)], TIMETABLE, today);
        assert_eq!(undated.period_start, today);
        assert_eq!(undated.period_end, NaiveDate::from_ymd_opt(2025, 6, 28).unwrap());
    }

    #[tokio::test]
    async fn stuck_cycle_is_cut_off_by_the_deadline() {
        let fetcher = StaticFetcher {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let h = harness_with(
            fetcher,
            None,
            IngestionSettings {
                cycle_timeout: Duration::from_millis(50),
                ..settings()
            },
        );
        tokio::time::timeout(
            Duration::from_secs(5),
            h.service.guarded_cycle(Job::Corrections),
        )
        .await
        .expect("deadline should cut the cycle short");
    }

    #[tokio::test]
    async fn run_skips_ticks_while_a_cycle_is_in_flight_and_drains_on_cancel() {
        let fetcher = StaticFetcher {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        fetcher.set(CORRECTIONS, corrections_grid("замена"));
        fetcher.set(TIMETABLE, timetable_grid("Math"));
        let h = harness_with(
            fetcher,
            None,
            IngestionSettings {
                timetable_period: Duration::from_secs(3600),
                corrections_period: Duration::from_millis(20),
                ..settings()
            },
        );

        let cancel = CancellationToken::new();
        let running = tokio::spawn(h.service.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("run should stop after cancel")
            .unwrap();

        // One startup cycle per job; later correction ticks hit the in-flight guard.
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
        // In-flight cycles were awaited, so their effects are visible.
        assert_eq!(h.repo.snapshots().await.len(), 1);
        assert!(h.notifier.sent().contains(&"change:G1:replacement".to_string()));
    }
}
