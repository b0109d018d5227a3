//! Domain entities. Pure data structures for the core business.
//!
//! No spreadsheet or SQL types here; adapters map into these.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// One class slot for one group, parsed from the wide timetable export.
///
/// `time_start`/`time_end` are either both empty (bell time unresolved) or both `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub group_name: String,
    pub subject: String,
    pub teacher: String,
    pub classroom: String,
    pub day_of_week: String,
    pub time_start: String,
    pub time_end: String,
    pub date: Option<NaiveDate>,
}

impl Lesson {
    pub fn has_resolved_time(&self) -> bool {
        !self.time_start.is_empty() && !self.time_end.is_empty()
    }
}

/// Kind of a timetable correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Replacement,
    Cancellation,
    Addition,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Replacement => "replacement",
            ChangeKind::Cancellation => "cancellation",
            ChangeKind::Addition => "addition",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One correction row from the corrections export.
///
/// Field order is the canonical serialization order used for identities and fingerprints;
/// do not reorder without accepting that every stored fingerprint changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    pub group_name: String,
    pub date: NaiveDate,
    pub time_start: String,
    pub time_end: String,
    pub subject: String,
    pub teacher: String,
    pub classroom: String,
    pub kind: ChangeKind,
    /// Only populated for replacements.
    pub original_subject: String,
}

impl Change {
    /// Canonical byte form: JSON with struct field order and ISO dates.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Serializing a plain struct of strings/dates/unit enums cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Deterministic identity (SHA-256 hex of the canonical form). Equal content ⇒ equal id.
    pub fn identity(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            group_name: self.group_name.clone(),
            date: self.date,
            time_start: self.time_start.clone(),
        }
    }
}

/// Opaque digest over a change set. Equal fingerprints ⇒ operationally identical sets.
/// Used only to skip no-op runs, never as an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSetFingerprint(String);

impl ChangeSetFingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeSetFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural key of a current-schedule row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub group_name: String,
    pub date: NaiveDate,
    pub time_start: String,
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.group_name,
            self.date.format("%d.%m.%Y"),
            self.time_start
        )
    }
}

/// Where a current-schedule row's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceTag {
    FromTimetable,
    FromCorrection,
}

impl ProvenanceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceTag::FromTimetable => "timetable",
            ProvenanceTag::FromCorrection => "correction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timetable" => Some(ProvenanceTag::FromTimetable),
            "correction" => Some(ProvenanceTag::FromCorrection),
            _ => None,
        }
    }
}

/// Row of the materialized current schedule. Natural key: (group, date, start time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentScheduleEntry {
    pub id: Uuid,
    pub group_name: String,
    pub date: NaiveDate,
    pub time_start: String,
    pub time_end: String,
    pub subject: String,
    pub teacher: String,
    pub classroom: String,
    pub provenance: ProvenanceTag,
    /// Snapshot id or change identity, depending on `provenance`.
    pub provenance_ref: String,
    pub is_active: bool,
}

impl CurrentScheduleEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            group_name: self.group_name.clone(),
            date: self.date,
            time_start: self.time_start.clone(),
        }
    }
}

/// Immutable capture of one parsed timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub id: Uuid,
    pub name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lessons: Vec<Lesson>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Corrections bookkeeping that survives restarts.
///
/// `last_fingerprint` gates re-merging. `notified` holds the identities of changes users were
/// already told about, so a re-merge does not repeat them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionState {
    pub last_fingerprint: Option<ChangeSetFingerprint>,
    #[serde(default)]
    pub notified: BTreeSet<String>,
}
