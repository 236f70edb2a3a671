//! A single live reader attached to a session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::buffer::Cursor;
use crate::error::{Error, Result};

use super::state::{ClientId, SessionStatus};

/// One live viewer of a session.
///
/// Frames are pushed into a bounded queue drained by the viewer's
/// [`SubscriberStream`](super::SubscriberStream). A write that cannot be
/// queued marks the subscriber dead instead of blocking the publisher.
#[derive(Debug)]
pub struct Subscriber {
    id: ClientId,
    created_at: Instant,
    last_active_at: Instant,
    read_cursor: Cursor,
    tx: Option<mpsc::Sender<Bytes>>,
    alive: Arc<AtomicBool>,
    status: SessionStatus,
}

impl Subscriber {
    /// Create a subscriber feeding `tx`.
    ///
    /// `alive` is shared with the consumer side so that dropping the stream
    /// stops fan-out on the very next write.
    pub fn new(id: ClientId, tx: mpsc::Sender<Bytes>, alive: Arc<AtomicBool>, cursor: Cursor) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_active_at: now,
            read_cursor: cursor,
            tx: Some(tx),
            alive,
            status: SessionStatus::Init,
        }
    }

    /// Subscriber id
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// When the subscriber was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When a frame was last queued for this subscriber
    pub fn last_active_at(&self) -> Instant {
        self.last_active_at
    }

    /// Ring position just past the last frame delivered
    pub fn read_cursor(&self) -> Cursor {
        self.read_cursor
    }

    /// Current lifecycle status
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Mark the subscriber as registered for live fan-out
    pub fn open(&mut self) {
        if self.status == SessionStatus::Init {
            self.status = SessionStatus::Open;
        }
    }

    /// Whether the transport can still accept frames
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
            && self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a chunk for delivery.
    ///
    /// On failure the subscriber is marked dead; the error is only for the
    /// caller's bookkeeping and must not abort a fan-out.
    pub fn write(&mut self, chunk: Bytes, cursor: Option<Cursor>) -> Result<()> {
        if !self.is_alive() {
            self.mark_dead();
            return Err(Error::SubscriberWriteFailure(self.id));
        }

        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::SubscriberWriteFailure(self.id));
        };

        match tx.try_send(chunk) {
            Ok(()) => {
                self.last_active_at = Instant::now();
                if let Some(cursor) = cursor {
                    self.read_cursor = cursor;
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(client_id = %self.id, "Subscriber queue full, dropping slow subscriber");
                self.mark_dead();
                Err(Error::SubscriberWriteFailure(self.id))
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_dead();
                Err(Error::SubscriberWriteFailure(self.id))
            }
        }
    }

    /// Whether a sweep may remove this subscriber
    pub fn can_be_removed(&self, now: Instant, max_age: Duration) -> bool {
        !self.is_alive() || now.saturating_duration_since(self.last_active_at) > max_age
    }

    /// Release the transport. Frames already queued are still delivered.
    pub fn close(&mut self) {
        self.mark_dead();
        self.tx = None;
        self.status = SessionStatus::Closed;
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(capacity: usize) -> (Subscriber, mpsc::Receiver<Bytes>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let sub = Subscriber::new(ClientId::generate(), tx, Arc::clone(&alive), Cursor::START);
        (sub, rx, alive)
    }

    #[tokio::test]
    async fn test_write_delivers_and_advances_cursor() {
        let (mut sub, mut rx, _alive) = subscriber(4);
        sub.open();
        assert_eq!(sub.status(), SessionStatus::Open);

        sub.write(Bytes::from_static(b"frame"), Some(Cursor::new(5, 0)))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(sub.read_cursor(), Cursor::new(5, 0));
    }

    #[test]
    fn test_dropped_receiver_marks_dead() {
        let (mut sub, rx, _alive) = subscriber(4);
        drop(rx);

        let err = sub.write(Bytes::from_static(b"x"), None).unwrap_err();
        assert!(matches!(err, Error::SubscriberWriteFailure(_)));
        assert!(!sub.is_alive());
        assert!(sub.can_be_removed(Instant::now(), Duration::from_secs(60)));
    }

    #[test]
    fn test_cancel_flag_stops_writes() {
        let (mut sub, mut rx, alive) = subscriber(4);
        alive.store(false, Ordering::Release);

        assert!(sub.write(Bytes::from_static(b"x"), None).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_marks_dead() {
        let (mut sub, _rx, _alive) = subscriber(1);

        sub.write(Bytes::from_static(b"a"), None).unwrap();
        assert!(sub.write(Bytes::from_static(b"b"), None).is_err());
        assert!(!sub.is_alive());
    }

    #[test]
    fn test_idle_subscriber_can_be_removed() {
        let (sub, _rx, _alive) = subscriber(1);
        let later = Instant::now() + Duration::from_secs(120);

        assert!(!sub.can_be_removed(Instant::now(), Duration::from_secs(60)));
        assert!(sub.can_be_removed(later, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_queued_frames() {
        let (mut sub, mut rx, _alive) = subscriber(4);
        sub.write(Bytes::from_static(b"last"), None).unwrap();

        sub.close();
        assert_eq!(sub.status(), SessionStatus::Closed);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"last"));
        assert!(rx.recv().await.is_none());
    }
}
