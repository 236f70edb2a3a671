//! Hub configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::sse::FRAME_OVERHEAD;
use crate::storage::DiskPolicy;

/// Where a session keeps its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Ring for recent history, log file for everything
    #[default]
    Hybrid,
    /// Ring only, nothing written to disk
    MemoryOnly,
    /// Log file only, replay always served from disk
    DiskOnly,
}

impl PersistenceMode {
    /// Whether sessions keep a log file
    pub fn uses_disk(self) -> bool {
        !matches!(self, PersistenceMode::MemoryOnly)
    }

    /// Whether sessions keep an in-memory ring
    pub fn uses_memory(self) -> bool {
        !matches!(self, PersistenceMode::DiskOnly)
    }
}

/// Configuration shared by every session of a hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Directory holding one log file per session
    pub output_dir: PathBuf,

    /// Memory/disk behavior of sessions
    pub persistence: PersistenceMode,

    /// In-memory replay window per session, in bytes
    pub ring_capacity: usize,

    /// Largest payload placed in one frame; bigger producer chunks are split
    pub max_chunk_size: usize,

    /// How long a publisher waits for the session write lock
    pub lock_timeout: Duration,

    /// Maximum number of sessions in the table
    pub max_sessions: usize,

    /// Subscribers idle longer than this are swept
    pub subscriber_max_age: Duration,

    /// Frames queued per subscriber before it is dropped as too slow
    pub subscriber_queue_capacity: usize,

    /// Sessions without subscribers idle longer than this are closed
    pub session_idle_timeout: Duration,

    /// Interval between garbage collection runs
    pub cleanup_interval: Duration,

    /// Total bytes allowed across all session logs
    pub disk_quota: u64,

    /// Logs not modified for this long are evicted first when over quota
    pub disk_max_file_age: Duration,

    /// Logs larger than this are evicted second when over quota
    pub disk_max_file_size: u64,

    /// Capacity of the hub lifecycle event channel
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dumps"),
            persistence: PersistenceMode::Hybrid,
            ring_capacity: 4 * 1024 * 1024, // 4MB
            max_chunk_size: 64 * 1024,      // 64KB
            lock_timeout: Duration::from_secs(10),
            max_sessions: 1024,
            subscriber_max_age: Duration::from_secs(24 * 60 * 60),
            subscriber_queue_capacity: 1024,
            session_idle_timeout: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60),
            disk_quota: 1024 * 1024 * 1024, // 1GB
            disk_max_file_age: Duration::from_secs(7 * 24 * 60 * 60),
            disk_max_file_size: 256 * 1024 * 1024,
            event_capacity: 256,
        }
    }
}

impl HubConfig {
    /// Create a config writing logs under `dir`
    pub fn with_output_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the output directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the persistence mode
    pub fn persistence(mut self, mode: PersistenceMode) -> Self {
        self.persistence = mode;
        self
    }

    /// Set the ring capacity (raised if it cannot hold one full frame)
    pub fn ring_capacity(mut self, bytes: usize) -> Self {
        self.ring_capacity = bytes;
        self.normalize()
    }

    /// Set the maximum payload per frame
    pub fn max_chunk_size(mut self, bytes: usize) -> Self {
        self.max_chunk_size = bytes;
        self.normalize()
    }

    /// Set the write lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the maximum number of sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the subscriber idle limit
    pub fn subscriber_max_age(mut self, age: Duration) -> Self {
        self.subscriber_max_age = age;
        self
    }

    /// Set the per-subscriber queue capacity
    pub fn subscriber_queue_capacity(mut self, frames: usize) -> Self {
        self.subscriber_queue_capacity = frames.max(1);
        self
    }

    /// Set the idle timeout after which empty sessions are closed
    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Set the garbage collection interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the disk quota and eviction limits
    pub fn disk_limits(mut self, quota: u64, max_file_age: Duration, max_file_size: u64) -> Self {
        self.disk_quota = quota;
        self.disk_max_file_age = max_file_age;
        self.disk_max_file_size = max_file_size;
        self
    }

    /// Disk eviction policy derived from this config
    pub fn disk_policy(&self) -> DiskPolicy {
        DiskPolicy {
            quota: self.disk_quota,
            max_age: self.disk_max_file_age,
            max_file_size: self.disk_max_file_size,
        }
    }

    /// Bytes of log tail scanned for the last frame id on startup
    pub fn id_scan_window(&self) -> usize {
        (self.max_chunk_size + FRAME_OVERHEAD) * 4
    }

    fn normalize(mut self) -> Self {
        self.max_chunk_size = self.max_chunk_size.max(1);
        self.ring_capacity = self.ring_capacity.max(self.max_chunk_size + FRAME_OVERHEAD);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.persistence, PersistenceMode::Hybrid);
        assert_eq!(config.ring_capacity, 4 * 1024 * 1024);
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.subscriber_max_age, Duration::from_secs(86_400));
        assert!(config.ring_capacity >= config.max_chunk_size + FRAME_OVERHEAD);
    }

    #[test]
    fn test_ring_capacity_raised_to_fit_a_frame() {
        let config = HubConfig::default().max_chunk_size(100).ring_capacity(16);
        assert_eq!(config.ring_capacity, 100 + FRAME_OVERHEAD);

        let config = HubConfig::default().max_chunk_size(0);
        assert_eq!(config.max_chunk_size, 1);
    }

    #[test]
    fn test_persistence_modes() {
        assert!(PersistenceMode::Hybrid.uses_disk());
        assert!(PersistenceMode::Hybrid.uses_memory());
        assert!(!PersistenceMode::MemoryOnly.uses_disk());
        assert!(!PersistenceMode::DiskOnly.uses_memory());
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::with_output_dir("/var/dumps")
            .persistence(PersistenceMode::MemoryOnly)
            .max_sessions(8)
            .lock_timeout(Duration::from_secs(2))
            .subscriber_queue_capacity(0)
            .disk_limits(1000, Duration::from_secs(60), 100);

        assert_eq!(config.output_dir, PathBuf::from("/var/dumps"));
        assert_eq!(config.persistence, PersistenceMode::MemoryOnly);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.subscriber_queue_capacity, 1);

        let policy = config.disk_policy();
        assert_eq!(policy.quota, 1000);
        assert_eq!(policy.max_file_size, 100);
    }
}
