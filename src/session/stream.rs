//! Subscriber output stream
//!
//! What a viewer reads, in order:
//!
//! ```text
//!  prelude (meta + client:connected)
//!      ──► history (ring snapshot or log prefix)
//!          ──► live frames (queued since registration)
//! ```
//!
//! The subscriber is registered for fan-out in the same critical section
//! that snapshots the history, so frames committed while history is still
//! being read wait in the live queue. Nothing is lost or sent twice.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::storage::read_prefix;

use super::state::{ClientId, SessionId};

/// Content type of a subscriber response
pub const CONTENT_TYPE: &str = "text/event-stream";
/// Cache policy of a subscriber response
pub const CACHE_CONTROL: &str = "no-cache";
/// Response header echoing the session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Where a new subscriber's history comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum History {
    /// Snapshot of the ring
    Memory(Bytes),
    /// The first `len` bytes of a log file
    Disk { path: PathBuf, len: u64 },
}

/// Byte stream delivered to one subscriber.
///
/// Dropping it cancels the subscription: fan-out stops at once and the
/// session removes and announces the subscriber the next time its state is
/// touched.
pub struct SubscriberStream {
    session_id: SessionId,
    client_id: ClientId,
    alive: Arc<AtomicBool>,
    departures: mpsc::UnboundedSender<ClientId>,
    inner: BoxStream<'static, Bytes>,
}

impl SubscriberStream {
    pub(crate) fn new(
        session_id: SessionId,
        client_id: ClientId,
        alive: Arc<AtomicBool>,
        departures: mpsc::UnboundedSender<ClientId>,
        prelude: Vec<Bytes>,
        history: History,
        live: mpsc::Receiver<Bytes>,
    ) -> Self {
        let history = match history {
            History::Memory(bytes) if bytes.is_empty() => stream::empty().boxed(),
            History::Memory(bytes) => stream::once(async move { bytes }).boxed(),
            History::Disk { path, len } => {
                let client = client_id;
                read_prefix(path, len)
                    .filter_map(move |chunk| async move {
                        match chunk {
                            Ok(bytes) => Some(bytes),
                            Err(e) => {
                                tracing::warn!(client_id = %client, error = %e, "Disk replay failed");
                                None
                            }
                        }
                    })
                    .boxed()
            }
        };

        let live = stream::unfold(live, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });

        let inner = stream::iter(prelude).chain(history).chain(live).boxed();

        Self {
            session_id,
            client_id,
            alive,
            departures,
            inner,
        }
    }

    /// Id assigned to this subscriber
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Session this stream belongs to
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// HTTP response headers for serving this stream
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("content-type", CONTENT_TYPE.to_string()),
            ("cache-control", CACHE_CONTROL.to_string()),
            (SESSION_HEADER, self.session_id.to_string()),
        ]
    }
}

impl Stream for SubscriberStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        // The session may already be gone
        let _ = self.departures.send(self.client_id);
        tracing::debug!(session = %self.session_id, client_id = %self.client_id, "Subscriber stream dropped");
    }
}

impl std::fmt::Debug for SubscriberStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberStream")
            .field("session_id", &self.session_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
