//! Infrastructure adapters. Implement outbound ports.
//!
//! Sheets, storage, notifications. Map errors to DomainError.

pub mod notify;
pub mod persistence;
pub mod sheets;
