//! Per-connection lifecycle hooks
//!
//! The transport creates one [`ConnectionHandler`] per accepted connection
//! and calls the hooks below as the socket moves through its life.

use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionPool, ConnectionSlot, CLOSE_GOING_AWAY};
use crate::presence::{JoinReport, PresenceBroadcaster};
use crate::registry::ConnectionRegistry;
use crate::router::{MessageRouter, RouteOutcome};

/// One method per transport lifecycle event
pub trait ConnectionLifecycle: Send + Sync {
    /// Connection accepted and ready to receive frames
    fn on_connect(&self) -> JoinReport;

    /// A data frame arrived from the peer
    fn on_message(&self, raw: &[u8]) -> RouteOutcome;

    /// The peer went away, with its close code if it sent one
    fn on_disconnect(&self, close_code: Option<u16>);

    /// The server closed the connection
    fn on_close(&self);

    /// The transport reported an error
    fn on_error(&self, error: &(dyn Error + 'static));
}

/// Lifecycle handler bound to a single connection
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    handle: ConnectionHandle,
    registry: ConnectionRegistry,
    pool: ConnectionPool,
    router: MessageRouter,
    presence: PresenceBroadcaster,
    _slot: Option<Arc<ConnectionSlot>>,
}

impl ConnectionHandler {
    pub fn new(
        handle: ConnectionHandle,
        registry: ConnectionRegistry,
        pool: ConnectionPool,
        router: MessageRouter,
        presence: PresenceBroadcaster,
    ) -> Self {
        Self {
            handle,
            registry,
            pool,
            router,
            presence,
            _slot: None,
        }
    }

    /// Hold `slot` until the last clone of this handler is dropped
    pub fn with_slot(mut self, slot: ConnectionSlot) -> Self {
        self._slot = Some(Arc::new(slot));
        self
    }

    /// Identity this connection was opened for
    pub fn identity(&self) -> &str {
        &self.handle.identity
    }

    /// Handle of this connection
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Drop this connection from shared state. Safe to call more than once.
    fn release(&self) -> bool {
        self.pool.remove(&self.handle.id);
        self.registry
            .remove_if_current(&self.handle.identity, &self.handle.id)
    }
}

impl ConnectionLifecycle for ConnectionHandler {
    fn on_connect(&self) -> JoinReport {
        self.pool.add(self.handle.clone());
        self.registry
            .register(self.handle.identity.clone(), self.handle.clone());
        info!(
            identity = %self.handle.identity,
            connection = %self.handle.id,
            "Connection event"
        );
        self.presence.announce_join(&self.handle)
    }

    fn on_message(&self, raw: &[u8]) -> RouteOutcome {
        debug!(
            identity = %self.handle.identity,
            bytes = raw.len(),
            "Message event"
        );
        self.router.route(&self.handle.identity, raw)
    }

    fn on_disconnect(&self, close_code: Option<u16>) {
        let removed = self.release();
        if is_going_away(close_code) {
            debug!(
                identity = %self.handle.identity,
                connection = %self.handle.id,
                removed,
                "Peer going away"
            );
            return;
        }
        info!(
            identity = %self.handle.identity,
            connection = %self.handle.id,
            close_code,
            removed,
            "Disconnection event"
        );
    }

    fn on_close(&self) {
        let removed = self.release();
        info!(
            identity = %self.handle.identity,
            connection = %self.handle.id,
            removed,
            "Close event"
        );
    }

    fn on_error(&self, error: &(dyn Error + 'static)) {
        warn!(
            identity = %self.handle.identity,
            error = %error,
            "Error event"
        );
    }
}

/// A 1001 close is a normal tab/page shutdown
fn is_going_away(close_code: Option<u16>) -> bool {
    close_code == Some(CLOSE_GOING_AWAY)
}
