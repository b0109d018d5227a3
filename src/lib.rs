//! timetable-sync: timetable and correction ingestion into a materialized current schedule,
//! with Hexagonal Architecture.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
