//! Periodic cleanup of subscribers, idle sessions and log files
//!
//! Three sweeps, none of which remove a session from the table:
//!
//! - dead or aged-out subscribers are removed and announced
//! - sessions with no subscribers that sat idle too long are closed
//! - when the logs exceed the disk quota, old, oversized and finally any
//!   remaining logs are evicted, except those of sessions being watched

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::storage::{plan_eviction, scan_logs, EvictionReason, LogFileInfo, SweepReport};

use super::store::SessionTable;

/// Outcome of one garbage collection run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Subscribers removed across all sessions
    pub subscribers_removed: usize,
    /// Idle sessions closed
    pub sessions_closed: usize,
    /// Disk sweep summary
    pub disk: SweepReport,
}

/// Garbage collector for a session table
pub struct GarbageCollector {
    table: Arc<SessionTable>,
}

impl GarbageCollector {
    /// Create a collector for `table`
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self { table }
    }

    /// Remove dead and idle subscribers from every session
    pub async fn sweep_subscribers(&self) -> usize {
        let mut removed = 0;
        for session in self.table.sessions().await {
            removed += session.sweep_subscribers().await.len();
        }
        removed
    }

    /// Close sessions that have no subscribers and have been idle too long
    pub async fn reap_idle_sessions(&self) -> usize {
        let timeout = self.table.config().session_idle_timeout;
        let mut closed = 0;

        for session in self.table.sessions().await {
            if session.close_if_idle(timeout).await {
                closed += 1;
            }
        }

        closed
    }

    /// Enforce the disk quota on the output directory.
    ///
    /// Failures on individual files are logged and counted, never fatal.
    pub async fn sweep_disk(&self) -> SweepReport {
        let config = self.table.config();
        let logs = scan_logs(&config.output_dir).await;

        let mut report = SweepReport {
            files: logs.len(),
            total_bytes: logs.iter().map(|l| l.size).sum(),
            ..Default::default()
        };

        let plan = plan_eviction(&logs, &config.disk_policy(), SystemTime::now());
        for (log, reason) in plan {
            self.evict(&log, reason, &mut report).await;
        }

        if report.evicted > 0 || report.failed > 0 {
            tracing::info!(
                files = report.files,
                total_bytes = report.total_bytes,
                evicted = report.evicted,
                reclaimed_bytes = report.reclaimed_bytes,
                protected = report.protected,
                failed = report.failed,
                "Disk sweep finished"
            );
        } else {
            tracing::debug!(files = report.files, total_bytes = report.total_bytes, "Disk sweep finished");
        }

        report
    }

    async fn evict(&self, log: &LogFileInfo, reason: EvictionReason, report: &mut SweepReport) {
        match self.table.evict_log(log).await {
            Ok(Some(bytes)) => {
                tracing::debug!(path = %log.path.display(), reason = ?reason, bytes, "Log evicted");
                report.evicted += 1;
                report.reclaimed_bytes += bytes;
            }
            Ok(None) => {
                tracing::debug!(path = %log.path.display(), "Log protected by live subscribers");
                report.protected += 1;
            }
            Err(e) => {
                tracing::warn!(path = %log.path.display(), error = %e, "Failed to evict log");
                report.failed += 1;
            }
        }
    }

    /// Run every sweep once
    pub async fn run_once(&self) -> GcReport {
        GcReport {
            subscribers_removed: self.sweep_subscribers().await,
            sessions_closed: self.reap_idle_sessions().await,
            disk: self.sweep_disk().await,
        }
    }

    /// Spawn the background collection task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gc = Arc::clone(self);
        let period = gc
            .table
            .config()
            .cleanup_interval
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let report = gc.run_once().await;
                tracing::trace!(
                    subscribers_removed = report.subscribers_removed,
                    sessions_closed = report.sessions_closed,
                    "Garbage collection run"
                );
            }
        })
    }
}
