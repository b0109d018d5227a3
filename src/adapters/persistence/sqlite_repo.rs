//! SQLite-backed store via libsql. Implements ScheduleStore and SnapshotStore.
//!
//! `current_schedule` carries a UNIQUE (group_name, date, time_start) natural key; rows are
//! never deleted, only flagged inactive. `schedule_snapshots` stores each parsed timetable
//! with its lessons as JSON. One database file: data/timetable.db

use crate::domain::{
    CurrentScheduleEntry, DomainError, EntryKey, Lesson, ProvenanceTag, ScheduleSnapshot,
};
use crate::ports::{ScheduleStore, ScheduleTx, SnapshotStore};
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{params, Connection, Database, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const CURRENT_SCHEDULE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS current_schedule (
    id TEXT PRIMARY KEY,
    group_name TEXT NOT NULL,
    date TEXT NOT NULL,
    time_start TEXT NOT NULL,
    time_end TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL,
    teacher TEXT NOT NULL DEFAULT '',
    classroom TEXT NOT NULL DEFAULT '',
    provenance TEXT NOT NULL,
    provenance_ref TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER NOT NULL,
    UNIQUE (group_name, date, time_start)
)"#;
const CURRENT_SCHEDULE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_current_group_date \
     ON current_schedule (group_name, date, is_active)";

const SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schedule_snapshots (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    lessons_json TEXT NOT NULL,
    source_url TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
)"#;

const ENTRY_COLUMNS: &str = "id, group_name, date, time_start, time_end, subject, teacher, \
     classroom, provenance, provenance_ref, is_active";

const SNAPSHOT_COLUMNS: &str =
    "id, name, period_start, period_end, lessons_json, source_url, created_at, is_active";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Milliseconds a connection waits on a locked database before failing.
const BUSY_TIMEOUT_MS: i64 = 5000;

fn repo_err(e: impl std::fmt::Display) -> DomainError {
    DomainError::Repo(e.to_string())
}

/// SQLite repository. One database file (timetable.db) in the given base directory.
pub struct SqliteRepo {
    db: Database,
    db_path: PathBuf,
}

impl SqliteRepo {
    /// Connect to (or create) the SQLite database and ensure the schema exists.
    /// Call this once at startup; the returned repo is safe to share via Arc.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(repo_err)?;
        let db_path = base.join("timetable.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(repo_err)?;
        let repo = Self { db, db_path };

        let conn = repo.conn().await?;
        // PRAGMA returns a row (new value); use query and consume rows.
        drain(&conn, "PRAGMA journal_mode=WAL").await?;
        drain(&conn, "PRAGMA synchronous=NORMAL").await?;

        conn.execute(CURRENT_SCHEDULE_TABLE, ())
            .await
            .map_err(repo_err)?;
        conn.execute(CURRENT_SCHEDULE_INDEX, ())
            .await
            .map_err(repo_err)?;
        conn.execute(SNAPSHOTS_TABLE, ()).await.map_err(repo_err)?;

        info!(path = %repo.db_path.display(), "SQLite connected with WAL mode");
        Ok(repo)
    }

    /// Fresh connection with a busy timeout, so the two ingestion cycles can take turns.
    async fn conn(&self) -> Result<Connection, DomainError> {
        let conn = self.db.connect().map_err(repo_err)?;
        drain(&conn, &format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS)).await?;
        Ok(conn)
    }
}

async fn drain(conn: &Connection, sql: &str) -> Result<(), DomainError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DomainError::Repo(format!("{} failed: {}", sql, e)))?;
    while rows.next().await.map_err(repo_err)?.is_some() {}
    Ok(())
}

fn entry_from_row(row: &Row) -> Result<CurrentScheduleEntry, DomainError> {
    let id: String = row.get(0).map_err(repo_err)?;
    let date: String = row.get(2).map_err(repo_err)?;
    let provenance: String = row.get(8).map_err(repo_err)?;
    let is_active: i64 = row.get(10).map_err(repo_err)?;
    Ok(CurrentScheduleEntry {
        id: Uuid::parse_str(&id).map_err(repo_err)?,
        group_name: row.get(1).map_err(repo_err)?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(repo_err)?,
        time_start: row.get(3).map_err(repo_err)?,
        time_end: row.get(4).map_err(repo_err)?,
        subject: row.get(5).map_err(repo_err)?,
        teacher: row.get(6).map_err(repo_err)?,
        classroom: row.get(7).map_err(repo_err)?,
        provenance: ProvenanceTag::parse(&provenance)
            .ok_or_else(|| DomainError::Repo(format!("unknown provenance '{}'", provenance)))?,
        provenance_ref: row.get(9).map_err(repo_err)?,
        is_active: is_active != 0,
    })
}

fn snapshot_from_row(row: &Row) -> Result<ScheduleSnapshot, DomainError> {
    let id: String = row.get(0).map_err(repo_err)?;
    let period_start: String = row.get(2).map_err(repo_err)?;
    let period_end: String = row.get(3).map_err(repo_err)?;
    let lessons_json: String = row.get(4).map_err(repo_err)?;
    let created_at: i64 = row.get(6).map_err(repo_err)?;
    let is_active: i64 = row.get(7).map_err(repo_err)?;
    let lessons: Vec<Lesson> = serde_json::from_str(&lessons_json).map_err(repo_err)?;
    Ok(ScheduleSnapshot {
        id: Uuid::parse_str(&id).map_err(repo_err)?,
        name: row.get(1).map_err(repo_err)?,
        period_start: NaiveDate::parse_from_str(&period_start, DATE_FORMAT).map_err(repo_err)?,
        period_end: NaiveDate::parse_from_str(&period_end, DATE_FORMAT).map_err(repo_err)?,
        lessons,
        source_url: row.get(5).map_err(repo_err)?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or_else(|| DomainError::Repo(format!("bad created_at {}", created_at)))?,
        is_active: is_active != 0,
    })
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Write transaction. Dropping it without `commit` rolls back.
struct SqliteTx {
    tx: Transaction,
}

#[async_trait::async_trait]
impl ScheduleStore for SqliteRepo {
    async fn begin(&self) -> Result<Box<dyn ScheduleTx>, DomainError> {
        let conn = self.conn().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(repo_err)?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn current_for_group(
        &self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<Vec<CurrentScheduleEntry>, DomainError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM current_schedule \
             WHERE group_name = ?1 AND date = ?2 AND is_active = 1 \
             ORDER BY time_start",
            ENTRY_COLUMNS
        );
        let date = date.format(DATE_FORMAT).to_string();
        let mut rows = conn
            .query(&sql, params![group_name, date])
            .await
            .map_err(repo_err)?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(repo_err)? {
            entries.push(entry_from_row(&row)?);
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl ScheduleTx for SqliteTx {
    async fn find_by_key(
        &mut self,
        key: &EntryKey,
    ) -> Result<Option<CurrentScheduleEntry>, DomainError> {
        let sql = format!(
            "SELECT {} FROM current_schedule \
             WHERE group_name = ?1 AND date = ?2 AND time_start = ?3",
            ENTRY_COLUMNS
        );
        let mut rows = self
            .tx
            .query(
                &sql,
                params![
                    key.group_name.as_str(),
                    key.date.format(DATE_FORMAT).to_string(),
                    key.time_start.as_str()
                ],
            )
            .await
            .map_err(repo_err)?;
        match rows.next().await.map_err(repo_err)? {
            Some(row) => Ok(Some(entry_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&mut self, e: &CurrentScheduleEntry) -> Result<(), DomainError> {
        self.tx
            .execute(
                r#"
                INSERT INTO current_schedule (id, group_name, date, time_start, time_end, subject,
                    teacher, classroom, provenance, provenance_ref, is_active, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    e.id.to_string(),
                    e.group_name.as_str(),
                    e.date.format(DATE_FORMAT).to_string(),
                    e.time_start.as_str(),
                    e.time_end.as_str(),
                    e.subject.as_str(),
                    e.teacher.as_str(),
                    e.classroom.as_str(),
                    e.provenance.as_str(),
                    e.provenance_ref.as_str(),
                    e.is_active as i64,
                    now_millis()
                ],
            )
            .await
            .map_err(repo_err)?;
        Ok(())
    }

    async fn update(&mut self, e: &CurrentScheduleEntry) -> Result<(), DomainError> {
        let changed = self
            .tx
            .execute(
                r#"
                UPDATE current_schedule SET
                    group_name = ?2, date = ?3, time_start = ?4, time_end = ?5, subject = ?6,
                    teacher = ?7, classroom = ?8, provenance = ?9, provenance_ref = ?10,
                    is_active = ?11, updated_at = ?12
                WHERE id = ?1
                "#,
                params![
                    e.id.to_string(),
                    e.group_name.as_str(),
                    e.date.format(DATE_FORMAT).to_string(),
                    e.time_start.as_str(),
                    e.time_end.as_str(),
                    e.subject.as_str(),
                    e.teacher.as_str(),
                    e.classroom.as_str(),
                    e.provenance.as_str(),
                    e.provenance_ref.as_str(),
                    e.is_active as i64,
                    now_millis()
                ],
            )
            .await
            .map_err(repo_err)?;
        if changed == 0 {
            return Err(DomainError::Repo(format!("no row with id {}", e.id)));
        }
        Ok(())
    }

    async fn deactivate_day(
        &mut self,
        group_name: &str,
        date: NaiveDate,
    ) -> Result<u64, DomainError> {
        let changed = self
            .tx
            .execute(
                "UPDATE current_schedule SET is_active = 0, updated_at = ?3 \
                 WHERE group_name = ?1 AND date = ?2 AND is_active = 1",
                params![
                    group_name,
                    date.format(DATE_FORMAT).to_string(),
                    now_millis()
                ],
            )
            .await
            .map_err(repo_err)?;
        debug!(group = group_name, %date, changed, "deactivated day");
        Ok(changed)
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(repo_err)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteRepo {
    async fn save_snapshot(&self, s: &ScheduleSnapshot) -> Result<(), DomainError> {
        let lessons_json = serde_json::to_string(&s.lessons).map_err(repo_err)?;
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO schedule_snapshots (id, name, period_start, period_end, lessons_json,
                source_url, created_at, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                lessons_json = excluded.lessons_json,
                source_url = excluded.source_url,
                is_active = excluded.is_active
            "#,
            params![
                s.id.to_string(),
                s.name.as_str(),
                s.period_start.format(DATE_FORMAT).to_string(),
                s.period_end.format(DATE_FORMAT).to_string(),
                lessons_json,
                s.source_url.as_str(),
                s.created_at.timestamp_millis(),
                s.is_active as i64
            ],
        )
        .await
        .map_err(repo_err)?;
        info!(
            id = %s.id,
            name = %s.name,
            lessons = s.lessons.len(),
            "saved snapshot"
        );
        Ok(())
    }

    async fn get_active_snapshot(&self) -> Result<Option<ScheduleSnapshot>, DomainError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM schedule_snapshots WHERE is_active = 1 \
             ORDER BY created_at DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        );
        let mut rows = conn.query(&sql, ()).await.map_err(repo_err)?;
        match rows.next().await.map_err(repo_err)? {
            Some(row) => Ok(Some(snapshot_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn deactivate_snapshot(&self, id: Uuid) -> Result<(), DomainError> {
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                "UPDATE schedule_snapshots SET is_active = 0 WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(repo_err)?;
        if changed == 0 {
            return Err(DomainError::Repo(format!("no snapshot {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Change, ChangeKind};
    use crate::usecases::MergeService;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 23).unwrap()
    }

    fn entry(start: &str, subject: &str) -> CurrentScheduleEntry {
        CurrentScheduleEntry {
            id: Uuid::new_v4(),
            group_name: "G1".into(),
            date: date(),
            time_start: start.into(),
            time_end: "09:45".into(),
            subject: subject.into(),
            teacher: "Ivanova".into(),
            classroom: "204".into(),
            provenance: ProvenanceTag::FromCorrection,
            provenance_ref: "abc".into(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn insert_find_update_commit() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        let stored = entry("09:00", "Physics");

        let mut tx = repo.begin().await.unwrap();
        tx.insert(&stored).await.unwrap();
        let found = tx.find_by_key(&stored.key()).await.unwrap();
        assert_eq!(found.as_ref(), Some(&stored));

        let updated = CurrentScheduleEntry {
            subject: "Chemistry".into(),
            ..stored.clone()
        };
        tx.update(&updated).await.unwrap();
        tx.commit().await.unwrap();

        let day = repo.current_for_group("G1", date()).await.unwrap();
        assert_eq!(day, vec![updated]);
    }

    #[tokio::test]
    async fn undecodable_optional_column_is_an_error() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        let mut tx = repo.begin().await.unwrap();
        tx.insert(&entry("09:00", "Physics")).await.unwrap();
        tx.commit().await.unwrap();

        repo.conn()
            .await
            .unwrap()
            .execute("UPDATE current_schedule SET teacher = x'00ff'", ())
            .await
            .unwrap();

        assert!(matches!(
            repo.current_for_group("G1", date()).await,
            Err(DomainError::Repo(_))
        ));
    }

    #[tokio::test]
    async fn uncommitted_transaction_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        {
            let mut tx = repo.begin().await.unwrap();
            tx.insert(&entry("09:00", "Physics")).await.unwrap();
        }
        assert!(repo.current_for_group("G1", date()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn natural_key_is_unique_and_failures_do_not_poison_the_transaction() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.insert(&entry("09:00", "Physics")).await.unwrap();
        assert!(tx.insert(&entry("09:00", "Art")).await.is_err());
        tx.insert(&entry("10:40", "Art")).await.unwrap();
        tx.commit().await.unwrap();

        let day = repo.current_for_group("G1", date()).await.unwrap();
        let subjects: Vec<_> = day.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Physics", "Art"]);
    }

    #[tokio::test]
    async fn deactivate_day_hides_rows() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.insert(&entry("09:00", "Physics")).await.unwrap();
        tx.insert(&entry("10:40", "Art")).await.unwrap();
        assert_eq!(tx.deactivate_day("G1", date()).await.unwrap(), 2);
        assert_eq!(tx.deactivate_day("G1", date()).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert!(repo.current_for_group("G1", date()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_is_idempotent_against_sqlite() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(SqliteRepo::connect(dir.path()).await.unwrap());
        let merge = MergeService::new(repo.clone());
        let changes = vec![Change {
            group_name: "G1".into(),
            date: date(),
            time_start: "09:00".into(),
            time_end: String::new(),
            subject: "Physics".into(),
            teacher: String::new(),
            classroom: String::new(),
            kind: ChangeKind::Replacement,
            original_subject: "Math".into(),
        }];

        let first = merge.apply(&changes).await.unwrap();
        let after_first = repo.current_for_group("G1", date()).await.unwrap();
        let second = merge.apply(&changes).await.unwrap();
        let after_second = repo.current_for_group("G1", date()).await.unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.updated, 1);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn snapshots_round_trip_and_deactivate() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        assert!(repo.get_active_snapshot().await.unwrap().is_none());

        let snapshot = ScheduleSnapshot {
            id: Uuid::new_v4(),
            name: "Timetable from 23.06.2025".into(),
            period_start: date(),
            period_end: date().succ_opt().unwrap(),
            lessons: vec![Lesson {
                group_name: "G1".into(),
                subject: "Math".into(),
                teacher: "Smith".into(),
                classroom: "101".into(),
                day_of_week: "Понедельник".into(),
                time_start: "08:15".into(),
                time_end: "09:00".into(),
                date: Some(date()),
            }],
            source_url: "https://example.org/sheet".into(),
            created_at: DateTime::<Utc>::from_timestamp_millis(1_750_000_000_000).unwrap(),
            is_active: true,
        };
        repo.save_snapshot(&snapshot).await.unwrap();
        assert_eq!(repo.get_active_snapshot().await.unwrap(), Some(snapshot.clone()));

        repo.deactivate_snapshot(snapshot.id).await.unwrap();
        assert!(repo.get_active_snapshot().await.unwrap().is_none());
        assert!(repo.deactivate_snapshot(Uuid::new_v4()).await.is_err());
    }
}
