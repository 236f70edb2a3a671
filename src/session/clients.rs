//! The set of live subscribers of one session
//!
//! Dead members are never removed mid-iteration: a fan-out marks failures
//! and compacts the set afterwards, returning the ids it dropped so the
//! session can announce them.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::buffer::Cursor;

use super::state::ClientId;
use super::subscriber::Subscriber;

/// Active subscribers of a session
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    members: Vec<Subscriber>,
}

impl SubscriberRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ids of all registered subscribers
    pub fn ids(&self) -> Vec<ClientId> {
        self.members.iter().map(Subscriber::id).collect()
    }

    /// Whether a subscriber is registered
    pub fn contains(&self, id: ClientId) -> bool {
        self.members.iter().any(|s| s.id() == id)
    }

    /// Number of registered subscribers whose transport is still up
    pub fn live_count(&self) -> usize {
        self.members.iter().filter(|s| s.is_alive()).count()
    }

    /// Register a subscriber for live fan-out
    pub fn add(&mut self, mut subscriber: Subscriber) {
        subscriber.open();
        self.members.push(subscriber);
    }

    /// Remove and close one subscriber
    pub fn remove(&mut self, id: ClientId) -> Option<Subscriber> {
        let index = self.members.iter().position(|s| s.id() == id)?;
        let mut subscriber = self.members.remove(index);
        subscriber.close();
        Some(subscriber)
    }

    /// Write a chunk to every member.
    ///
    /// Members whose write fails are closed and removed after the pass.
    /// Returns the ids removed.
    pub fn fan_out(&mut self, chunk: &Bytes, cursor: Option<Cursor>) -> Vec<ClientId> {
        let mut failed = 0;
        for subscriber in &mut self.members {
            if let Err(e) = subscriber.write(chunk.clone(), cursor) {
                tracing::debug!(client_id = %subscriber.id(), error = %e, "Fan-out write failed");
                failed += 1;
            }
        }

        if failed == 0 {
            return Vec::new();
        }
        self.compact(|s| !s.is_alive())
    }

    /// Remove every member whose consumer has gone away
    pub fn remove_dead(&mut self) -> Vec<ClientId> {
        self.compact(|s| !s.is_alive())
    }

    /// Remove and close every member that is dead or idle past `max_age`
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> Vec<ClientId> {
        self.compact(|s| s.can_be_removed(now, max_age))
    }

    /// Close every member and empty the registry
    pub fn close_all(&mut self) -> Vec<ClientId> {
        self.compact(|_| true)
    }

    fn compact(&mut self, remove: impl Fn(&Subscriber) -> bool) -> Vec<ClientId> {
        let mut removed = Vec::new();
        self.members.retain_mut(|subscriber| {
            if remove(subscriber) {
                subscriber.close();
                removed.push(subscriber.id());
                false
            } else {
                true
            }
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    struct Member {
        id: ClientId,
        rx: mpsc::Receiver<Bytes>,
        alive: Arc<AtomicBool>,
    }

    fn add_member(registry: &mut SubscriberRegistry) -> Member {
        let (tx, rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let id = ClientId::generate();
        registry.add(Subscriber::new(id, tx, Arc::clone(&alive), Cursor::START));
        Member { id, rx, alive }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_everyone() {
        let mut registry = SubscriberRegistry::new();
        let mut a = add_member(&mut registry);
        let mut b = add_member(&mut registry);

        let removed = registry.fan_out(&Bytes::from_static(b"frame"), None);

        assert!(removed.is_empty());
        assert_eq!(a.rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(b.rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[test]
    fn test_fan_out_drops_dead_members() {
        let mut registry = SubscriberRegistry::new();
        let a = add_member(&mut registry);
        let mut b = add_member(&mut registry);

        a.alive.store(false, Ordering::Release);
        let removed = registry.fan_out(&Bytes::from_static(b"x"), None);

        assert_eq!(removed, vec![a.id]);
        assert_eq!(registry.ids(), vec![b.id]);
        assert_eq!(b.rx.try_recv().unwrap(), Bytes::from_static(b"x"));

        // Not written again after removal
        let removed = registry.fan_out(&Bytes::from_static(b"y"), None);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_sweep_returns_each_id_once() {
        let mut registry = SubscriberRegistry::new();
        let a = add_member(&mut registry);
        let _b = add_member(&mut registry);
        drop(a.rx);

        let removed = registry.sweep(Instant::now(), Duration::from_secs(60));
        assert_eq!(removed, vec![a.id]);
        assert!(registry.sweep(Instant::now(), Duration::from_secs(60)).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_dead_keeps_idle_members() {
        let mut registry = SubscriberRegistry::new();
        let a = add_member(&mut registry);
        let b = add_member(&mut registry);
        a.alive.store(false, Ordering::Release);

        assert_eq!(registry.remove_dead(), vec![a.id]);
        assert!(registry.remove_dead().is_empty());
        assert_eq!(registry.ids(), vec![b.id]);
    }

    #[test]
    fn test_sweep_idle_members() {
        let mut registry = SubscriberRegistry::new();
        let _a = add_member(&mut registry);

        let later = Instant::now() + Duration::from_secs(3600);
        let removed = registry.sweep(later, Duration::from_secs(60));

        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_close_all() {
        let mut registry = SubscriberRegistry::new();
        let mut a = add_member(&mut registry);
        let b = add_member(&mut registry);
        let c = add_member(&mut registry);

        assert!(registry.remove(a.id).is_some());
        assert!(registry.remove(a.id).is_none());
        assert!(a.rx.recv().await.is_none());

        let mut closed = registry.close_all();
        closed.sort();
        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(closed, expected);
        assert!(registry.is_empty());
    }
}
