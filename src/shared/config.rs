//! Application configuration. Sources, timers, paths.
//!
//! Read from `TIMETABLE_SYNC_*` environment variables (and `.env`), plus an optional file
//! named by `TIMETABLE_SYNC_CONFIG`.

use crate::domain::DomainError;
use crate::usecases::{ChangeKindPolicy, IngestionSettings};
use chrono::Weekday;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TIMETABLE_PERIOD_SECS: u64 = 60 * 60;
pub const DEFAULT_CORRECTIONS_PERIOD_SECS: u64 = 600;
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    /// Weekly timetable sheet (Google Sheets link, export URL or local CSV path).
    #[serde(default)]
    pub timetable_url: Option<String>,

    /// Corrections sheet. Same forms as `timetable_url`.
    #[serde(default)]
    pub corrections_url: Option<String>,

    #[serde(default)]
    pub data_dir: Option<String>,

    /// Wake-up interval of the timetable job (default hourly). The weekday gate decides
    /// whether a wake-up actually ingests.
    #[serde(default)]
    pub timetable_period_secs: Option<u64>,

    /// Weekday on which the timetable is re-ingested once (default saturday). `any` = every
    /// wake-up.
    #[serde(default)]
    pub timetable_day: Option<String>,

    #[serde(default)]
    pub corrections_period_secs: Option<u64>,

    /// Deadline for one ingestion cycle.
    #[serde(default)]
    pub cycle_timeout_secs: Option<u64>,

    /// HTTP timeout for sheet fetches and webhook posts.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// `strict` (drop unknown change kinds, default) or `lenient` (treat them as replacements).
    #[serde(default)]
    pub unknown_change_kind: Option<String>,

    /// If set, notices are POSTed here instead of only being logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        Self::from_sources(std::env::var("TIMETABLE_SYNC_CONFIG").ok().as_deref())
    }

    /// Environment plus an optional config file (format inferred from its extension).
    pub fn from_sources(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut c = config::Config::builder();
        if let Some(path) = file {
            c = c.add_source(config::File::with_name(path));
        }
        c = c.add_source(config::Environment::with_prefix("TIMETABLE_SYNC"));
        c.build()?.try_deserialize()
    }

    pub fn data_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.data_dir.as_deref().unwrap_or("./data"))
    }

    pub fn timetable_period_secs_or_default(&self) -> u64 {
        self.timetable_period_secs
            .unwrap_or(DEFAULT_TIMETABLE_PERIOD_SECS)
    }

    pub fn corrections_period_secs_or_default(&self) -> u64 {
        self.corrections_period_secs
            .unwrap_or(DEFAULT_CORRECTIONS_PERIOD_SECS)
    }

    pub fn cycle_timeout_secs_or_default(&self) -> u64 {
        self.cycle_timeout_secs.unwrap_or(DEFAULT_CYCLE_TIMEOUT_SECS)
    }

    pub fn fetch_timeout_secs_or_default(&self) -> u64 {
        self.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS)
    }

    /// `None` means no weekday gate.
    pub fn timetable_day_or_default(&self) -> Result<Option<Weekday>, DomainError> {
        let raw = self.timetable_day.as_deref().unwrap_or("saturday").trim();
        if raw.eq_ignore_ascii_case("any") {
            return Ok(None);
        }
        raw.parse::<Weekday>()
            .map(Some)
            .map_err(|_| DomainError::Config(format!("timetable_day: unknown weekday '{}'", raw)))
    }

    pub fn change_kind_policy(&self) -> Result<ChangeKindPolicy, DomainError> {
        match self
            .unknown_change_kind
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("strict") => Ok(ChangeKindPolicy::Strict),
            Some("lenient") => Ok(ChangeKindPolicy::Lenient),
            Some(other) => Err(DomainError::Config(format!(
                "unknown_change_kind must be strict or lenient, got '{}'",
                other
            ))),
        }
    }

    /// Validated settings for the orchestrator. Both URLs are required; periods must be > 0.
    pub fn ingestion_settings(&self) -> Result<IngestionSettings, DomainError> {
        let required = |v: &Option<String>, name: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    DomainError::Config(format!("set TIMETABLE_SYNC_{}", name.to_uppercase()))
                })
        };
        let positive = |secs: u64, name: &str| {
            if secs == 0 {
                Err(DomainError::Config(format!("{} must be greater than 0", name)))
            } else {
                Ok(Duration::from_secs(secs))
            }
        };

        Ok(IngestionSettings {
            timetable_url: required(&self.timetable_url, "timetable_url")?,
            corrections_url: required(&self.corrections_url, "corrections_url")?,
            timetable_period: positive(
                self.timetable_period_secs_or_default(),
                "timetable_period_secs",
            )?,
            timetable_day: self.timetable_day_or_default()?,
            corrections_period: positive(
                self.corrections_period_secs_or_default(),
                "corrections_period_secs",
            )?,
            cycle_timeout: positive(self.cycle_timeout_secs_or_default(), "cycle_timeout_secs")?,
            change_kind_policy: self.change_kind_policy()?,
        })
    }
}
