//! Session table implementation
//!
//! The process-wide map from session id to hub. Sessions are created on
//! first use and removed only by an explicit delete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::error::{Error, Result};
use crate::session::{Session, SessionId};
use crate::stats::HubStats;
use crate::storage::log::remove_if_exists;
use crate::storage::LogFileInfo;

use super::config::HubConfig;
use super::events::HubEvent;

/// Registry of all sessions
///
/// Thread-safe via `RwLock`. Lookups of existing sessions only take the
/// read lock. A new session is opened without any table lock and inserted
/// under the write lock after a re-check.
pub struct SessionTable {
    /// Map of session id to session
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,

    /// Configuration shared with every session
    config: Arc<HubConfig>,

    /// Lifecycle notifications
    events: broadcast::Sender<HubEvent>,

    /// Bumped after every log file removed for a session not in the table
    log_removals: AtomicU64,
}

impl SessionTable {
    /// Create a new session table with default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new session table with custom configuration
    pub fn with_config(config: HubConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            sessions: RwLock::new(HashMap::new()),
            config: Arc::new(config),
            events,
            log_removals: AtomicU64::new(0),
        }
    }

    /// Get the table configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe to session lifecycle notifications
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Look up a session, creating it if the id is unseen.
    ///
    /// Fails with `InvalidSessionId` for a malformed id and with
    /// `CapacityExceeded` when the table is full.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Session>> {
        let id = SessionId::new(id)?;

        loop {
            {
                let sessions = self.sessions.read().await;
                if let Some(session) = sessions.get(&id) {
                    return Ok(Arc::clone(session));
                }
                self.check_capacity(&id, sessions.len())?;
            }

            // Hydration reads the log, so no table lock is held here
            let removals = self.log_removals.load(Ordering::Acquire);
            let session = Arc::new(
                Session::open(id.clone(), Arc::clone(&self.config), Some(self.events.clone())).await?,
            );

            let mut sessions = self.sessions.write().await;

            // Another task may have created it while we were opening
            if let Some(existing) = sessions.get(&id) {
                return Ok(Arc::clone(existing));
            }

            // The file we opened may have been unlinked by a disk sweep
            if self.log_removals.load(Ordering::Acquire) != removals {
                tracing::debug!(session = %id, "Log removed while opening session, retrying");
                continue;
            }

            self.check_capacity(&id, sessions.len())?;
            sessions.insert(id.clone(), Arc::clone(&session));

            tracing::info!(session = %id, sessions = sessions.len(), "Session registered");
            let _ = self.events.send(HubEvent::SessionCreated(id));

            return Ok(session);
        }
    }

    fn check_capacity(&self, id: &SessionId, len: usize) -> Result<()> {
        if len < self.config.max_sessions {
            return Ok(());
        }
        tracing::warn!(
            session = %id,
            max_sessions = self.config.max_sessions,
            "Session table full"
        );
        Err(Error::CapacityExceeded {
            max: self.config.max_sessions,
        })
    }

    /// Look up an existing session
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let id = SessionId::new(id).ok()?;
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session and permanently delete its log.
    ///
    /// Returns `false` if no such session exists.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = SessionId::new(id)?;
        let session = self.sessions.write().await.remove(&id);

        match session {
            Some(session) => {
                session.delete().await?;
                tracing::info!(session = %id, "Session removed from table");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Evict one log file found in the output directory.
    ///
    /// The log of a session in the table is evicted through that session and
    /// is spared while it has live subscribers (`Ok(None)`). Any other log is
    /// unlinked while the table lock is held, so no session can be inserted
    /// for it meanwhile. Returns the bytes reclaimed.
    pub(crate) async fn evict_log(&self, log: &LogFileInfo) -> Result<Option<u64>> {
        let sessions = self.sessions.read().await;
        if let Some(session) = log.session_id.as_ref().and_then(|id| sessions.get(id)) {
            let session = Arc::clone(session);
            drop(sessions);
            return session.evict_history().await;
        }

        let removed = remove_if_exists(&log.path).await;
        // Sessions opened before this point must not adopt the unlinked file
        self.log_removals.fetch_add(1, Ordering::AcqRel);
        drop(sessions);

        removed?;
        Ok(Some(log.size))
    }

    /// Whether a session is in the table
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of sessions in the table
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the table is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of every session in the table
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of every session, for sweeps that must not hold the table lock
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Totals across every session
    pub async fn stats(&self) -> HubStats {
        let mut stats = HubStats::default();
        for session in self.sessions().await {
            stats.add(&session.stats().await);
        }
        stats
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
