//! Session broadcast hub
//!
//! A [`Session`] accepts one logical write stream and fans it out to every
//! live subscriber, keeping a replay window in memory and a complete copy
//! on disk.
//!
//! # Locking
//!
//! ```text
//!   publish / broadcast_event ──► write_lock (held for the whole producer stream,
//!            │                                 acquired with a timeout)
//!            ▼
//!   per frame ──────────────────► core lock: frame ─► log ─► ring ─► fan-out
//!                                    ▲
//!   subscribe / unsubscribe / sweep / close ──┘
//! ```
//!
//! The write lock gives concurrent producers a single total order; the core
//! lock makes each frame commit atomic with respect to subscriber
//! registration, so a new subscriber's history snapshot and its live queue
//! meet exactly at a frame boundary. Control events only take the core lock
//! and never wait on a slow producer.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};

use crate::buffer::{CircularBuffer, Cursor};
use crate::error::{Error, Result};
use crate::registry::{HubConfig, HubEvent};
use crate::sse::{EventFramer, SessionMeta, SystemEvent};
use crate::stats::SessionStats;
use crate::storage::log::remove_if_exists;
use crate::storage::{Hydration, PersistentLog};

use super::clients::SubscriberRegistry;
use super::state::{ClientId, SessionId, SessionStatus};
use super::stream::{History, SubscriberStream};
use super::subscriber::Subscriber;

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Frames committed
    pub frames: u64,
    /// Payload bytes committed
    pub bytes: u64,
    /// Id of the first frame committed
    pub first_id: Option<u64>,
    /// Id of the last frame committed
    pub last_id: Option<u64>,
    /// The source stream failed before it ended
    pub interrupted: bool,
}

impl PublishReceipt {
    fn record(&mut self, id: u64, len: usize) {
        self.frames += 1;
        self.bytes += len as u64;
        self.first_id.get_or_insert(id);
        self.last_id = Some(id);
    }
}

/// State mutated only under the core lock
struct Core {
    id: SessionId,
    status: SessionStatus,
    deleted: bool,
    framer: EventFramer,

    ring: Option<CircularBuffer>,
    /// Logical offset of the ring's first byte
    ring_base: u64,
    /// Logical offsets where frames held by the ring start
    frame_starts: VecDeque<u64>,

    log: Option<PersistentLog>,
    /// Logical offset of the log file's first byte
    log_base: u64,
    /// A disk write failed, so the log is missing frames
    log_gap: bool,

    /// Total framed bytes committed over the session's life
    logical_end: u64,

    registry: SubscriberRegistry,
    /// Ids of subscribers whose stream was dropped
    departures: mpsc::UnboundedReceiver<ClientId>,
    events: Option<broadcast::Sender<HubEvent>>,
    last_activity: Instant,

    frames_published: u64,
    bytes_published: u64,
    total_subscribers: u64,
    dropped_subscribers: u64,
    disk_write_failures: u64,
}

impl Core {
    fn activate(&mut self) -> Result<()> {
        if self.deleted {
            return Err(Error::SessionDeleted(self.id.clone()));
        }
        if self.status != SessionStatus::Open {
            tracing::info!(session = %self.id, from = self.status.as_str(), "Session opened");
            self.status = SessionStatus::Open;
        }
        self.last_activity = Instant::now();
        Ok(())
    }

    fn notify(&self, event: HubEvent) {
        if let Some(tx) = &self.events {
            // No receivers is fine
            let _ = tx.send(event);
        }
    }

    fn notify_count(&self) {
        self.notify(HubEvent::ClientCount {
            session_id: self.id.clone(),
            count: self.registry.len(),
        });
    }

    fn ring_cursor(&self) -> Option<Cursor> {
        self.ring.as_ref().map(CircularBuffer::current_cursor)
    }

    /// Frame, persist, buffer and fan out one payload. Returns the frame id.
    async fn commit(&mut self, payload: &[u8]) -> u64 {
        let (id, frame) = self.framer.fast_encode(payload);
        let start = self.logical_end;

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.write(&frame).await {
                self.disk_write_failures += 1;
                self.log_gap = true;
                tracing::warn!(session = %self.id, frame_id = id, error = %e, "Disk write failed, frame kept in memory only");
            }
        }

        self.logical_end += frame.len() as u64;

        if let Some(ring) = self.ring.as_mut() {
            match ring.write(&frame) {
                Ok(()) => {
                    self.frame_starts.push_back(start);
                    let oldest = self.ring_base + ring.oldest_offset();
                    while self.frame_starts.front().is_some_and(|&s| s < oldest) {
                        self.frame_starts.pop_front();
                    }
                }
                Err(e) => {
                    // Restart the ring after this frame so it never holds a gap
                    tracing::error!(session = %self.id, frame_id = id, error = %e, "Frame does not fit in ring");
                    ring.clear();
                    self.ring_base = self.logical_end;
                    self.frame_starts.clear();
                }
            }
        }

        self.frames_published += 1;
        self.bytes_published += payload.len() as u64;
        self.last_activity = Instant::now();

        let cursor = self.ring_cursor();
        let dropped = self.registry.fan_out(&frame, cursor);
        self.announce_removed(dropped);

        tracing::trace!(session = %self.id, frame_id = id, len = frame.len(), "Frame committed");
        id
    }

    /// Send a control frame to every subscriber. Not numbered, not stored.
    fn broadcast_control(&mut self, event: SystemEvent) {
        let mut pending = VecDeque::from([event]);
        let mut dropped = false;

        while let Some(event) = pending.pop_front() {
            let frame = match EventFramer::system_event(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(session = %self.id, event = event.name(), error = %e, "Failed to encode control event");
                    continue;
                }
            };

            for client_id in self.registry.fan_out(&frame, None) {
                self.dropped_subscribers += 1;
                dropped = true;
                pending.push_back(SystemEvent::ClientClosed {
                    client_id,
                    client_count: self.registry.len(),
                });
            }
        }

        if dropped {
            self.notify_count();
        }
    }

    /// Remove subscribers whose stream has been dropped and announce them.
    ///
    /// Returns the ids removed.
    async fn reap_departed(&mut self) -> Vec<ClientId> {
        let mut removed = Vec::new();
        while let Ok(client_id) = self.departures.try_recv() {
            // Already gone if a fan-out or unsubscribe got there first
            if self.registry.remove(client_id).is_some() {
                removed.push(client_id);
            }
        }
        removed.extend(self.registry.remove_dead());

        self.release(&removed).await;
        removed
    }

    /// Announce removed subscribers. When none remain the stream is announced
    /// closed and the log handle released.
    async fn release(&mut self, removed: &[ClientId]) {
        if removed.is_empty() {
            return;
        }
        self.announce_removed(removed.to_vec());

        if self.registry.is_empty() {
            self.broadcast_control(SystemEvent::StreamClosed {
                session_id: self.id.clone(),
            });
            if let Some(log) = self.log.as_mut() {
                log.close().await;
            }
            tracing::info!(session = %self.id, "No subscribers left");
        }
    }

    /// End every subscription and release the log handle
    async fn shutdown(&mut self) {
        self.broadcast_control(SystemEvent::StreamClosed {
            session_id: self.id.clone(),
        });
        let closed = self.registry.close_all();
        if !closed.is_empty() {
            self.notify_count();
        }

        if let Some(log) = self.log.as_mut() {
            log.close().await;
        }
        self.status = SessionStatus::Closed;
        self.notify(HubEvent::SessionClosed(self.id.clone()));

        tracing::info!(session = %self.id, subscribers = closed.len(), "Session closed");
    }

    /// Announce subscribers that just left the registry
    fn announce_removed(&mut self, removed: Vec<ClientId>) {
        if removed.is_empty() {
            return;
        }
        for client_id in removed {
            self.dropped_subscribers += 1;
            tracing::debug!(session = %self.id, client_id = %client_id, "Subscriber removed");
            self.broadcast_control(SystemEvent::ClientClosed {
                client_id,
                client_count: self.registry.len(),
            });
        }
        self.notify_count();
    }

    /// Logical offset of the first complete frame still in the ring
    fn ring_replay_start(&self) -> Option<u64> {
        let ring = self.ring.as_ref()?;
        if ring.oldest_offset() == 0 {
            return Some(self.ring_base);
        }
        let oldest = self.ring_base + ring.oldest_offset();
        Some(
            self.frame_starts
                .iter()
                .copied()
                .find(|&s| s >= oldest)
                .unwrap_or(self.logical_end),
        )
    }

    /// Pick the most complete history source for a new subscriber
    fn history(&self) -> History {
        let disk = self
            .log
            .as_ref()
            .filter(|log| !self.log_gap && self.log_base + log.size() == self.logical_end)
            .map(|log| (log.path().to_path_buf(), log.size()));

        match (self.ring_replay_start(), disk) {
            (Some(start), Some((path, len))) if self.log_base < start => History::Disk { path, len },
            (Some(start), _) => History::Memory(self.read_ring_from(start)),
            (None, Some((path, len))) => History::Disk { path, len },
            (None, None) => {
                if self.logical_end > 0 {
                    tracing::warn!(session = %self.id, "No complete history source, replay skipped");
                }
                History::Memory(Bytes::new())
            }
        }
    }

    fn read_ring_from(&self, start: u64) -> Bytes {
        let Some(ring) = self.ring.as_ref() else {
            return Bytes::new();
        };
        match ring.read_since(ring.cursor_at(start - self.ring_base)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Ring replay failed");
                Bytes::new()
            }
        }
    }
}

/// Broadcast hub for one named debug stream
pub struct Session {
    id: SessionId,
    config: Arc<HubConfig>,
    created_at: SystemTime,
    write_lock: Mutex<()>,
    core: Mutex<Core>,
    departures: mpsc::UnboundedSender<ClientId>,
}

impl Session {
    /// Open a session, loading any history already on disk
    pub async fn open(
        id: SessionId,
        config: Arc<HubConfig>,
        events: Option<broadcast::Sender<HubEvent>>,
    ) -> Result<Self> {
        let mode = config.persistence;
        let mut ring = mode
            .uses_memory()
            .then(|| CircularBuffer::new(config.ring_capacity));

        let mut log = None;
        let mut hydration = Hydration::default();
        if mode.uses_disk() {
            let opened = PersistentLog::open(PersistentLog::path_for(&config.output_dir, &id)).await?;
            hydration = match opened.hydrate(ring.as_mut(), config.id_scan_window()).await {
                Ok(hydration) => hydration,
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Failed to load history, serving from disk only");
                    if let Some(ring) = ring.as_mut() {
                        ring.clear();
                    }
                    Hydration {
                        file_len: opened.size(),
                        ..Default::default()
                    }
                }
            };
            log = Some(opened);
        }

        let file_len = hydration.file_len;
        let mut frame_starts = VecDeque::new();
        let ring_base = if hydration.fully_in_memory {
            if file_len > 0 {
                frame_starts.push_back(0);
            }
            0
        } else {
            file_len
        };

        tracing::info!(
            session = %id,
            mode = ?mode,
            history_bytes = file_len,
            last_id = hydration.last_id.unwrap_or(0),
            "Session created"
        );

        let (departures_tx, departures) = mpsc::unbounded_channel();
        let core = Core {
            id: id.clone(),
            status: SessionStatus::Init,
            deleted: false,
            framer: EventFramer::resume_after(hydration.last_id.unwrap_or(0)),
            ring,
            ring_base,
            frame_starts,
            log,
            log_base: 0,
            log_gap: false,
            logical_end: file_len,
            registry: SubscriberRegistry::new(),
            departures,
            events,
            last_activity: Instant::now(),
            frames_published: 0,
            bytes_published: 0,
            total_subscribers: 0,
            dropped_subscribers: 0,
            disk_write_failures: 0,
        };

        Ok(Self {
            id,
            config,
            created_at: SystemTime::now(),
            write_lock: Mutex::new(()),
            core: Mutex::new(core),
            departures: departures_tx,
        })
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// When the session was created
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current lifecycle status
    pub async fn status(&self) -> SessionStatus {
        self.core.lock().await.status
    }

    /// Whether the session has been deleted
    pub async fn is_deleted(&self) -> bool {
        self.core.lock().await.deleted
    }

    /// Take the core lock, first removing subscribers that went away
    async fn lock_core(&self) -> MutexGuard<'_, Core> {
        let mut core = self.core.lock().await;
        core.reap_departed().await;
        core
    }

    /// Number of attached subscribers
    pub async fn client_count(&self) -> usize {
        self.lock_core().await.registry.len()
    }

    /// Number of subscribers whose transport is still up
    pub async fn live_client_count(&self) -> usize {
        self.lock_core().await.registry.live_count()
    }

    /// Time since the last publish or subscribe
    pub async fn idle_for(&self) -> std::time::Duration {
        self.core.lock().await.last_activity.elapsed()
    }

    /// Ring position just past the newest byte
    pub async fn cursor(&self) -> Cursor {
        self.core
            .lock()
            .await
            .ring_cursor()
            .unwrap_or(Cursor::START)
    }

    /// Attach a new subscriber.
    ///
    /// The returned stream yields the meta frame and this subscriber's
    /// `client:connected` event, then the session history, then live frames.
    pub async fn subscribe(&self) -> Result<SubscriberStream> {
        let mut core = self.lock_core().await;
        core.activate()?;

        let client_id = ClientId::generate();
        let client_count = core.registry.len() + 1;
        let connected = SystemEvent::ClientConnected {
            client_id,
            client_count,
        };
        let meta = SessionMeta {
            session_id: self.id.to_string(),
            created_at: unix_millis(self.created_at),
            client_count,
            client_id: client_id.to_string(),
        };
        let prelude = vec![EventFramer::meta(&meta)?, EventFramer::system_event(&connected)?];

        // Existing subscribers hear about the newcomer first
        core.broadcast_control(connected);

        let history = core.history();
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let cursor = core.ring_cursor().unwrap_or(Cursor::START);
        core.registry
            .add(Subscriber::new(client_id, tx, Arc::clone(&alive), cursor));
        core.total_subscribers += 1;
        core.notify_count();

        let replay = match &history {
            History::Memory(_) => "memory",
            History::Disk { .. } => "disk",
        };
        tracing::info!(
            session = %self.id,
            client_id = %client_id,
            clients = core.registry.len(),
            replay,
            "Subscriber added"
        );

        Ok(SubscriberStream::new(
            self.id.clone(),
            client_id,
            alive,
            self.departures.clone(),
            prelude,
            history,
            rx,
        ))
    }

    /// Remove one subscriber immediately. Returns whether it was registered.
    pub async fn unsubscribe(&self, client_id: ClientId) -> bool {
        let mut core = self.lock_core().await;
        if core.registry.remove(client_id).is_none() {
            return false;
        }

        tracing::info!(session = %self.id, client_id = %client_id, "Subscriber unsubscribed");
        let client_count = core.registry.len();
        core.broadcast_control(SystemEvent::ClientClosed {
            client_id,
            client_count,
        });
        core.notify_count();
        true
    }

    async fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        let timeout = self.config.lock_timeout;
        tokio::time::timeout(timeout, self.write_lock.lock())
            .await
            .map_err(|_| {
                tracing::warn!(session = %self.id, timeout = ?timeout, "Write lock timeout");
                Error::LockTimeout(timeout)
            })
    }

    /// Publish a producer byte stream.
    ///
    /// Each chunk becomes one or more frames (split at `max_chunk_size`).
    /// Concurrent publishers are serialized: all frames of one call are
    /// contiguous. A source error stops the publish; frames already committed
    /// stay valid and the receipt is marked interrupted.
    pub async fn publish<S>(&self, source: S) -> Result<PublishReceipt>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let _writer = self.lock_writer().await?;
        self.lock_core().await.activate()?;

        let max_chunk = self.config.max_chunk_size;
        let mut receipt = PublishReceipt::default();
        futures_util::pin_mut!(source);

        while let Some(item) = source.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, frames = receipt.frames, "Publish source failed");
                    receipt.interrupted = true;
                    break;
                }
            };

            for piece in chunk.chunks(max_chunk) {
                let mut core = self.core.lock().await;
                core.activate()?;
                let id = core.commit(piece).await;
                receipt.record(id, piece.len());
            }
        }

        tracing::debug!(
            session = %self.id,
            frames = receipt.frames,
            bytes = receipt.bytes,
            interrupted = receipt.interrupted,
            "Publish finished"
        );

        Ok(receipt)
    }

    /// Publish a single in-memory payload
    pub async fn publish_bytes(&self, payload: impl Into<Bytes>) -> Result<PublishReceipt> {
        let payload = payload.into();
        self.publish(stream::iter([Ok::<_, io::Error>(payload)])).await
    }

    /// Serialize `data` as JSON and publish it as one numbered frame
    pub async fn broadcast_event<T: Serialize + ?Sized>(&self, data: &T) -> Result<u64> {
        let body = serde_json::to_vec(data)?;
        let _writer = self.lock_writer().await?;

        let mut core = self.lock_core().await;
        core.activate()?;
        Ok(core.commit(&body).await)
    }

    /// Send an out-of-band control event to every subscriber
    pub async fn broadcast_system_event(&self, event: SystemEvent) -> Result<()> {
        let mut core = self.lock_core().await;
        if core.deleted {
            return Err(Error::SessionDeleted(self.id.clone()));
        }
        core.broadcast_control(event);
        Ok(())
    }

    /// Read ring bytes written since `cursor`.
    ///
    /// Fails with [`Error::CursorExpired`] if any byte after the cursor has
    /// already been overwritten.
    pub async fn read_since(&self, cursor: Cursor) -> Result<Bytes> {
        let core = self.core.lock().await;
        let Some(ring) = core.ring.as_ref() else {
            return Err(Error::CursorExpired {
                cursor,
                current: Cursor::START,
            });
        };
        if !ring.is_intact(cursor) {
            return Err(Error::CursorExpired {
                cursor,
                current: ring.current_cursor(),
            });
        }
        ring.read_since(cursor)
    }

    /// Remove dead and idle subscribers.
    ///
    /// Each removal is announced with `client:closed`. If this empties the
    /// registry the stream is announced closed and the log handle released;
    /// the session itself stays in the table.
    pub async fn sweep_subscribers(&self) -> Vec<ClientId> {
        let mut core = self.core.lock().await;
        let mut removed = core.reap_departed().await;

        let idle = core
            .registry
            .sweep(Instant::now(), self.config.subscriber_max_age);
        core.release(&idle).await;
        removed.extend(idle);

        if !removed.is_empty() {
            tracing::debug!(session = %self.id, removed = removed.len(), "Subscribers swept");
        }
        removed
    }

    /// Release the log handle and every subscriber. Idempotent.
    ///
    /// A later publish or subscribe reopens the session.
    pub async fn close(&self) {
        let mut core = self.lock_core().await;
        if core.status == SessionStatus::Closed || core.deleted {
            return;
        }

        let idle = core
            .registry
            .sweep(Instant::now(), self.config.subscriber_max_age);
        core.announce_removed(idle);
        core.shutdown().await;
    }

    /// Close the session if nobody is watching and nothing happened for
    /// `timeout`. Returns whether it was closed.
    ///
    /// The check and the close happen under one lock. A subscriber racing
    /// with it either keeps the session open or attaches after the close and
    /// reopens it.
    pub async fn close_if_idle(&self, timeout: Duration) -> bool {
        let mut core = self.lock_core().await;
        if core.status == SessionStatus::Closed || core.deleted || !core.registry.is_empty() {
            return false;
        }

        let idle = core.last_activity.elapsed();
        if idle < timeout {
            return false;
        }

        tracing::info!(session = %self.id, idle_secs = idle.as_secs(), "Closing idle session");
        core.shutdown().await;
        true
    }

    /// Close the session and permanently delete its log
    pub async fn delete(&self) -> Result<()> {
        self.close().await;

        let mut core = self.core.lock().await;
        if core.deleted {
            return Ok(());
        }
        core.deleted = true;
        core.status = SessionStatus::Closed;

        if let Some(log) = core.log.take() {
            log.delete().await?;
        }
        core.notify(HubEvent::SessionDeleted(self.id.clone()));

        tracing::info!(session = %self.id, "Session deleted");
        Ok(())
    }

    /// Drop the on-disk history unless a subscriber is attached.
    ///
    /// Returns the bytes reclaimed, or `None` if the session is protected.
    /// In-memory history is kept.
    pub async fn evict_history(&self) -> Result<Option<u64>> {
        let mut core = self.lock_core().await;
        if core.registry.live_count() > 0 {
            return Ok(None);
        }

        let logical_end = core.logical_end;
        let Some(log) = core.log.as_mut() else {
            // Stray file left by an earlier run with persistence enabled
            let path = PersistentLog::path_for(&self.config.output_dir, &self.id);
            let size = tokio::fs::metadata(&path).await.map_or(0, |m| m.len());
            remove_if_exists(&path).await?;
            return Ok(Some(size));
        };
        let size = log.size();
        log.truncate().await?;

        core.log_base = logical_end;
        core.log_gap = false;

        tracing::info!(session = %self.id, bytes = size, "Session log evicted");
        Ok(Some(size))
    }

    /// Snapshot of the session's statistics
    pub async fn stats(&self) -> SessionStats {
        let core = self.lock_core().await;
        SessionStats {
            status: core.status,
            frames_published: core.frames_published,
            bytes_published: core.bytes_published,
            last_id: core.framer.last_id(),
            subscribers: core.registry.len(),
            total_subscribers: core.total_subscribers,
            dropped_subscribers: core.dropped_subscribers,
            persisted_bytes: core.log.as_ref().map_or(0, PersistentLog::size),
            disk_write_failures: core.disk_write_failures,
            ring_utilization: core.ring.as_ref().map_or(0.0, CircularBuffer::utilization),
            idle_for: core.last_activity.elapsed(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
