//! Statistics for sessions and the hub

pub mod metrics;

pub use metrics::{HubStats, SessionStats};
