//! Relay Gateway - identity registry and message fan-out
//!
//! Transport-agnostic core of the relay: which identity owns which live
//! connection, directed delivery between identities, and join
//! announcements. The transport plugs in through [`ConnectionLifecycle`].

mod connection;
mod gateway;
mod lifecycle;
mod presence;
mod protocol;
mod registry;
mod router;

pub use connection::{
    BroadcastReport, ConnectionError, ConnectionHandle, ConnectionPool, ConnectionSlot,
    OutboundFrame, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_TRY_AGAIN_LATER,
};
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use lifecycle::{ConnectionHandler, ConnectionLifecycle};
pub use presence::{JoinReport, PresenceBroadcaster};
pub use protocol::{decode_envelope, join_notice, welcome_notice, InboundEnvelope, ServerFrame};
pub use registry::ConnectionRegistry;
pub use router::{DropReason, MessageRouter, RouteOutcome, SenderPolicy};
