//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use crate::domain::report::ColumnRole;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Structural precondition of an export violated; nothing was parsed.
    #[error("Malformed layout: {0}")]
    MalformedLayout(String),

    #[error("Missing required columns: {}", format_roles(.0))]
    MissingColumns(Vec<ColumnRole>),

    #[error("Sheet fetch failed: {0}")]
    Fetch(String),

    #[error("Repository error: {0}")]
    Repo(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cycle exceeded its deadline of {secs} seconds")]
    Timeout { secs: u64 },
}

fn format_roles(roles: &[ColumnRole]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
