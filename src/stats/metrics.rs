//! Statistics and metrics for sessions

use std::time::Duration;

use crate::session::SessionStatus;

/// Session-level statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Payload frames committed
    pub frames_published: u64,
    /// Payload bytes committed (before framing)
    pub bytes_published: u64,
    /// Id of the last payload frame
    pub last_id: u64,
    /// Subscribers currently registered
    pub subscribers: usize,
    /// Subscribers ever attached
    pub total_subscribers: u64,
    /// Subscribers removed because their transport died or went idle
    pub dropped_subscribers: u64,
    /// Size of the log file
    pub persisted_bytes: u64,
    /// Frames that could not be written to disk
    pub disk_write_failures: u64,
    /// Ring utilization as a percentage
    pub ring_utilization: f32,
    /// Time since the last publish or subscribe
    pub idle_for: Duration,
}

impl SessionStats {
    /// Average payload size per frame
    pub fn average_frame_size(&self) -> u64 {
        if self.frames_published > 0 {
            self.bytes_published / self.frames_published
        } else {
            0
        }
    }
}

/// Hub-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Sessions in the table
    pub sessions: usize,
    /// Sessions currently open
    pub open_sessions: usize,
    /// Subscribers across all sessions
    pub subscribers: usize,
    /// Payload frames across all sessions
    pub frames_published: u64,
    /// Payload bytes across all sessions
    pub bytes_published: u64,
}

impl HubStats {
    /// Fold one session's stats into the totals
    pub fn add(&mut self, stats: &SessionStats) {
        self.sessions += 1;
        if stats.status == SessionStatus::Open {
            self.open_sessions += 1;
        }
        self.subscribers += stats.subscribers;
        self.frames_published += stats.frames_published;
        self.bytes_published += stats.bytes_published;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(status: SessionStatus, frames: u64, bytes: u64, subscribers: usize) -> SessionStats {
        SessionStats {
            status,
            frames_published: frames,
            bytes_published: bytes,
            last_id: frames,
            subscribers,
            total_subscribers: subscribers as u64,
            dropped_subscribers: 0,
            persisted_bytes: 0,
            disk_write_failures: 0,
            ring_utilization: 0.0,
            idle_for: Duration::ZERO,
        }
    }

    #[test]
    fn test_average_frame_size() {
        assert_eq!(stats(SessionStatus::Open, 4, 1000, 0).average_frame_size(), 250);
        assert_eq!(stats(SessionStatus::Init, 0, 0, 0).average_frame_size(), 0);
    }

    #[test]
    fn test_hub_stats_totals() {
        let mut hub = HubStats::default();
        hub.add(&stats(SessionStatus::Open, 3, 300, 2));
        hub.add(&stats(SessionStatus::Closed, 5, 50, 0));

        assert_eq!(hub.sessions, 2);
        assert_eq!(hub.open_sessions, 1);
        assert_eq!(hub.subscribers, 2);
        assert_eq!(hub.frames_published, 8);
        assert_eq!(hub.bytes_published, 350);
    }
}
