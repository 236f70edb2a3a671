//! On-disk persistence
//!
//! One append-only log file per session under the configured output
//! directory, plus the quota sweep that reclaims old or oversized logs.

pub mod log;
pub mod sweep;

pub use log::{read_prefix, Hydration, PersistentLog, LOG_EXTENSION};
pub use sweep::{plan_eviction, scan_logs, DiskPolicy, EvictionReason, LogFileInfo, SweepReport};
