//! Disk quota enforcement for session logs
//!
//! Eviction only happens when the logs under the output directory exceed
//! the configured quota. Victims are chosen in three passes:
//!
//! 1. logs older than the maximum age
//! 2. logs larger than the maximum individual size
//! 3. if still over quota, every remaining log
//!
//! Planning is pure; executing the plan is left to the caller, which knows
//! which logs belong to live sessions.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::session::SessionId;

use super::log::LOG_EXTENSION;

/// Disk eviction limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskPolicy {
    /// Total bytes allowed across all logs
    pub quota: u64,
    /// Logs last modified longer ago than this are evicted first
    pub max_age: Duration,
    /// Logs larger than this are evicted second
    pub max_file_size: u64,
}

/// A session log found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// Full path of the log
    pub path: PathBuf,
    /// Session the log belongs to, if the file name is a valid id
    pub session_id: Option<SessionId>,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

/// Why a log was chosen for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Older than the maximum age
    Expired,
    /// Larger than the maximum file size
    Oversized,
    /// Still over quota after the other passes
    OverQuota,
}

/// Summary of one disk sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Logs found
    pub files: usize,
    /// Total bytes found
    pub total_bytes: u64,
    /// Logs skipped because their session has live subscribers
    pub protected: usize,
    /// Logs removed
    pub evicted: usize,
    /// Bytes reclaimed
    pub reclaimed_bytes: u64,
    /// Logs that could not be removed
    pub failed: usize,
}

/// List every session log under `dir`.
///
/// Entries that cannot be inspected are logged and skipped. A missing
/// directory yields an empty list.
pub async fn scan_logs(dir: &Path) -> Vec<LogFileInfo> {
    let mut logs = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return logs,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to read log directory");
            return logs;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                break;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stat log");
                continue;
            }
        };

        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| SessionId::new(s).ok());

        logs.push(LogFileInfo {
            path,
            session_id,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
        });
    }

    logs
}

/// Choose which logs to evict so the total fits in the quota
pub fn plan_eviction(
    logs: &[LogFileInfo],
    policy: &DiskPolicy,
    now: SystemTime,
) -> Vec<(LogFileInfo, EvictionReason)> {
    let mut total: u64 = logs.iter().map(|l| l.size).sum();
    if total <= policy.quota {
        return Vec::new();
    }

    let mut remaining: Vec<&LogFileInfo> = logs.iter().collect();
    let mut plan = Vec::new();

    let passes: [(EvictionReason, &dyn Fn(&LogFileInfo) -> bool); 3] = [
        (EvictionReason::Expired, &|log: &LogFileInfo| {
            now.duration_since(log.modified).unwrap_or_default() > policy.max_age
        }),
        (EvictionReason::Oversized, &|log: &LogFileInfo| log.size > policy.max_file_size),
        (EvictionReason::OverQuota, &|_: &LogFileInfo| true),
    ];

    for (reason, matches) in passes {
        if total <= policy.quota {
            break;
        }
        remaining.retain(|log| {
            if matches(log) {
                total -= log.size;
                plan.push(((*log).clone(), reason));
                false
            } else {
                true
            }
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn log(name: &str, size: u64, age: Duration, now: SystemTime) -> LogFileInfo {
        LogFileInfo {
            path: PathBuf::from(format!("/dumps/{}.sse", name)),
            session_id: SessionId::new(name).ok(),
            size,
            modified: now - age,
        }
    }

    fn policy(quota: u64) -> DiskPolicy {
        DiskPolicy {
            quota,
            max_age: 7 * DAY,
            max_file_size: 100,
        }
    }

    #[test]
    fn test_under_quota_evicts_nothing() {
        let now = SystemTime::now();
        let logs = vec![log("aaaa", 50, 30 * DAY, now), log("bbbb", 500, DAY, now)];

        assert!(plan_eviction(&logs, &policy(1000), now).is_empty());
    }

    #[test]
    fn test_expired_first() {
        let now = SystemTime::now();
        let logs = vec![
            log("aaaa", 50, 30 * DAY, now),
            log("bbbb", 60, DAY, now),
            log("cccc", 40, 10 * DAY, now),
        ];

        let plan = plan_eviction(&logs, &policy(100), now);
        let names: Vec<_> = plan
            .iter()
            .map(|(l, r)| (l.session_id.clone().unwrap().to_string(), *r))
            .collect();
        assert_eq!(
            names,
            vec![
                ("aaaa".to_string(), EvictionReason::Expired),
                ("cccc".to_string(), EvictionReason::Expired),
            ]
        );
    }

    #[test]
    fn test_oversized_second() {
        let now = SystemTime::now();
        let logs = vec![log("aaaa", 150, DAY, now), log("bbbb", 60, DAY, now)];

        let plan = plan_eviction(&logs, &policy(100), now);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0.size, 150);
        assert_eq!(plan[0].1, EvictionReason::Oversized);
    }

    #[test]
    fn test_everything_when_still_over_quota() {
        let now = SystemTime::now();
        let logs = vec![log("aaaa", 80, DAY, now), log("bbbb", 80, DAY, now)];

        let plan = plan_eviction(&logs, &policy(100), now);
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|(_, r)| *r == EvictionReason::OverQuota));
    }

    #[tokio::test]
    async fn test_scan_logs_filters_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("ab12cd.sse"), b"12345").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("bad-name.sse"), b"xy").await.unwrap();

        let mut logs = scan_logs(dir.path()).await;
        logs.sort_by_key(|l| l.size);

        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].session_id, None);
        assert_eq!(logs[1].session_id, Some(SessionId::new("ab12cd").unwrap()));
        assert_eq!(logs[1].size, 5);
    }

    #[tokio::test]
    async fn test_scan_missing_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(scan_logs(&dir.path().join("nope")).await.is_empty());
    }
}
