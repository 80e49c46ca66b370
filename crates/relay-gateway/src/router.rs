//! Directed message routing
//!
//! Decodes a peer's envelope, resolves the target identity and queues the
//! re-encoded frame on the target connection. Nothing here returns an
//! error to the caller: every failure ends as a logged [`RouteOutcome`].

use tracing::{debug, warn};

use crate::protocol::{decode_envelope, ServerFrame};
use crate::registry::ConnectionRegistry;

/// How the `from` field of an inbound envelope is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderPolicy {
    /// Relay `from` exactly as the peer wrote it
    Trust,
    /// Replace `from` with the identity the connection was opened for
    #[default]
    Overwrite,
}

/// Why a message was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Inbound bytes were not a valid envelope
    Decode,
    /// Outbound frame could not be encoded
    Encode,
    /// Target identity has no live connection
    UnknownTarget,
    /// Target transport was already gone
    SendFailed,
}

/// Result of routing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Frame queued on the target connection
    Delivered {
        /// Target identity
        to: String,
        /// Connection the frame was queued on
        connection_id: String,
    },
    /// Message dropped
    Dropped(DropReason),
}

/// Routes directed messages between identities
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    sender_policy: SenderPolicy,
}

impl MessageRouter {
    /// Create a new message router
    pub fn new(registry: ConnectionRegistry, sender_policy: SenderPolicy) -> Self {
        Self {
            registry,
            sender_policy,
        }
    }

    pub fn sender_policy(&self) -> SenderPolicy {
        self.sender_policy
    }

    /// Route one raw inbound frame received from `sender`
    pub fn route(&self, sender: &str, raw: &[u8]) -> RouteOutcome {
        let mut envelope = match decode_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(sender = %sender, error = %e, "Dropping undecodable message");
                return RouteOutcome::Dropped(DropReason::Decode);
            }
        };

        if self.sender_policy == SenderPolicy::Overwrite && envelope.from != sender {
            debug!(
                sender = %sender,
                claimed = %envelope.from,
                "Replacing claimed sender with connection identity"
            );
            envelope.from = sender.to_string();
        }

        let to = envelope.to.clone();
        let text = match ServerFrame::message(envelope).encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(sender = %sender, error = %e, "Dropping message that failed to encode");
                return RouteOutcome::Dropped(DropReason::Encode);
            }
        };

        let Some(target) = self.registry.lookup(&to) else {
            debug!(sender = %sender, to = %to, "No live connection for target");
            return RouteOutcome::Dropped(DropReason::UnknownTarget);
        };

        match target.send_text(text) {
            Ok(()) => RouteOutcome::Delivered {
                to,
                connection_id: target.id,
            },
            Err(e) => {
                warn!(sender = %sender, to = %to, error = %e, "Failed to deliver message");
                RouteOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }
}
