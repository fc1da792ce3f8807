//! HTTP surface for FactFlux: start research sessions, follow their progress
//! over server-sent events and download the enhanced report.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
