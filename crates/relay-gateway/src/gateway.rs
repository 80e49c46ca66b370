//! Gateway main structure
//!
//! Owns the shared connection state and hands out one lifecycle handler
//! per accepted connection.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{
    BroadcastReport, ConnectionError, ConnectionHandle, ConnectionPool, OutboundFrame,
    CLOSE_NORMAL,
};
use crate::lifecycle::ConnectionHandler;
use crate::presence::PresenceBroadcaster;
use crate::protocol::ServerFrame;
use crate::registry::ConnectionRegistry;
use crate::router::{MessageRouter, SenderPolicy};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Send the join notice to the joining connection as well
    pub include_self_in_join_broadcast: bool,
    /// Treatment of the `from` field on directed messages
    pub sender_policy: SenderPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            include_self_in_join_broadcast: false,
            sender_policy: SenderPolicy::default(),
        }
    }
}

/// The relay gateway
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    registry: ConnectionRegistry,
    pool: ConnectionPool,
    router: MessageRouter,
    presence: PresenceBroadcaster,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl Gateway {
    /// Create a new Gateway instance
    pub fn new(config: GatewayConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let pool = ConnectionPool::new(config.max_connections);
        let router = MessageRouter::new(registry.clone(), config.sender_policy);
        let presence = PresenceBroadcaster::new(pool.clone(), config.include_self_in_join_broadcast);

        Self {
            config,
            registry,
            pool,
            router,
            presence,
        }
    }

    /// Get the identity registry
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the connection pool
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Accept a new connection for `identity`.
    ///
    /// Returns the lifecycle handler and the receiver the transport writer
    /// drains. A capacity slot is taken here and held by the handler;
    /// nothing is registered until the transport calls `on_connect`.
    pub fn accept(
        &self,
        identity: impl Into<String>,
    ) -> Result<(ConnectionHandler, mpsc::UnboundedReceiver<OutboundFrame>), GatewayError> {
        let slot = self
            .pool
            .try_reserve()
            .ok_or(GatewayError::AtCapacity(self.config.max_connections))?;

        let (handle, rx) = ConnectionHandle::open(identity);
        debug!(identity = %handle.identity, connection = %handle.id, "Accepted connection");
        let handler = ConnectionHandler::new(
            handle,
            self.registry.clone(),
            self.pool.clone(),
            self.router.clone(),
            self.presence.clone(),
        )
        .with_slot(slot);
        Ok((handler, rx))
    }

    /// Broadcast a frame to every live connection
    pub fn broadcast(&self, frame: &ServerFrame) -> Result<BroadcastReport, GatewayError> {
        let text = frame.encode()?;
        let report = self.pool.broadcast(&text, None);
        if report.failed > 0 {
            warn!(failed = report.failed, "Broadcast reached closed connections");
        }
        Ok(report)
    }

    /// Close the current connection of `identity` from the server side.
    ///
    /// The mapping is removed when the transport reports the close.
    pub fn close(&self, identity: &str, reason: &str) -> Result<(), GatewayError> {
        let handle = self
            .registry
            .lookup(identity)
            .ok_or_else(|| GatewayError::IdentityNotConnected(identity.to_string()))?;
        handle.close(CLOSE_NORMAL, reason)?;
        Ok(())
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gateway(identities={}, connections={})",
            self.registry.len(),
            self.pool.count()
        )
    }
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Server at capacity ({0} connections)")]
    AtCapacity(usize),
    #[error("Identity not connected: {0}")]
    IdentityNotConnected(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
