//! Connection management
//!
//! A [`ConnectionHandle`] is the send side of one live connection. The
//! transport owns the socket and drains the matching receiver; everything
//! else in the gateway only ever pushes [`OutboundFrame`]s into the handle.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Close code sent when the server ends a connection on purpose
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code a browser sends when the page goes away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when the gateway refuses a connection for capacity
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Frame queued for the transport writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Encoded text frame
    Text(String),
    /// Ask the transport to close the socket
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Handle to a live connection for sending frames
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Public connection token, unique per connection
    pub id: String,
    /// Identity this connection was opened for
    pub identity: String,
    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Create a new connection handle
    pub fn new(
        id: impl Into<String>,
        identity: impl Into<String>,
        sender: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Create a handle with a fresh token, returning the receiver the
    /// transport writer must drain
    pub fn open(identity: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Uuid::new_v4().to_string(), identity, tx), rx)
    }

    /// Queue a text frame
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.send(OutboundFrame::Text(text.into()))
    }

    /// Queue a close request
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), ConnectionError> {
        self.send(OutboundFrame::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Queue a frame for this connection
    pub fn send(&self, frame: OutboundFrame) -> Result<(), ConnectionError> {
        self.sender
            .send(frame)
            .map_err(|_| ConnectionError::Closed(self.id.clone()))
    }

    /// Whether the transport side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Get connection ID
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Outcome of a fan-out over the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued successfully
    pub delivered: usize,
    /// Recipients whose transport was already gone
    pub failed: usize,
}

/// Capacity held by one accepted connection, returned to the pool on drop
#[derive(Debug)]
pub struct ConnectionSlot {
    reserved: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Every live connection, keyed by connection token.
///
/// Unlike the identity registry this also holds connections whose identity
/// mapping has since been taken over by a newer connection. Capacity is
/// counted in slots, taken when a connection is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    connections: Arc<DashMap<String, ConnectionHandle>>,
    reserved: Arc<AtomicUsize>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            reserved: Arc::new(AtomicUsize::new(0)),
            max_connections,
        }
    }

    /// Get current connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Slots currently held by accepted connections
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Check if pool is at capacity
    pub fn is_full(&self) -> bool {
        self.reserved() >= self.max_connections
    }

    /// Take a capacity slot, or `None` when every slot is held
    pub fn try_reserve(&self) -> Option<ConnectionSlot> {
        let max = self.max_connections;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < max).then_some(held + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                reserved: Arc::clone(&self.reserved),
            })
    }

    /// Add a connection to the pool
    pub fn add(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id.clone(), handle);
    }

    /// Remove a connection from the pool
    pub fn remove(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .remove(connection_id)
            .map(|(_, handle)| handle)
    }

    /// Queue a text frame on every connection, optionally skipping one.
    ///
    /// A failed recipient is counted and skipped; it never stops the loop.
    pub fn broadcast(&self, text: &str, except: Option<&str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for entry in self.connections.iter() {
            let handle = entry.value();
            if except == Some(handle.id.as_str()) {
                continue;
            }
            match handle.send_text(text) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    // Transport already gone, its disconnect will clean up
                    debug!(connection = %handle.id, "Broadcast skipped closed connection");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Connection-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed: {0}")]
    Closed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_send_and_close() {
        let (handle, mut rx) = ConnectionHandle::open("alice");
        assert_eq!(handle.identity, "alice");
        assert!(Uuid::parse_str(handle.id()).is_ok());

        handle.send_text("hello").unwrap();
        handle.close(CLOSE_NORMAL, "bye").unwrap();

        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("hello".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: "bye".to_string()
            })
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (handle, rx) = ConnectionHandle::open("alice");
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(handle.send_text("x"), Err(ConnectionError::Closed(_))));
    }

    #[test]
    fn test_tokens_are_unique() {
        let (a, _ra) = ConnectionHandle::open("same");
        let (b, _rb) = ConnectionHandle::open("same");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_and_isolates_failures() {
        let pool = ConnectionPool::new(10);
        let (a, mut ra) = ConnectionHandle::open("a");
        let (b, rb) = ConnectionHandle::open("b");
        let (c, mut rc) = ConnectionHandle::open("c");
        pool.add(a.clone());
        pool.add(b.clone());
        pool.add(c.clone());
        drop(rb);

        let report = pool.broadcast("ping", Some(&c.id));

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(ra.recv().await, Some(OutboundFrame::Text("ping".to_string())));
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn test_pool_add_remove() {
        let pool = ConnectionPool::new(2);
        let (a, _ra) = ConnectionHandle::open("a");
        let (b, _rb) = ConnectionHandle::open("b");
        pool.add(a.clone());
        pool.add(b);

        assert!(pool.remove(&a.id).is_some());
        assert!(pool.remove(&a.id).is_none());
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn test_slots_are_returned_on_drop() {
        let pool = ConnectionPool::new(2);
        let first = pool.try_reserve().unwrap();
        let _second = pool.try_reserve().unwrap();
        assert!(pool.is_full());
        assert!(pool.try_reserve().is_none());

        drop(first);
        assert_eq!(pool.reserved(), 1);
        assert!(pool.try_reserve().is_some());
        // the temporary slot above is already back
        assert_eq!(pool.reserved(), 1);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_capacity() {
        let pool = ConnectionPool::new(1);
        let barrier = std::sync::Barrier::new(20);

        let held: Vec<ConnectionSlot> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..20)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        pool.try_reserve()
                    })
                })
                .collect();
            workers
                .into_iter()
                .filter_map(|worker| worker.join().unwrap())
                .collect()
        });

        assert_eq!(held.len(), 1);
        assert_eq!(pool.reserved(), 1);
    }
}
