//! Join announcements

use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionPool};
use crate::protocol::{join_notice, welcome_notice, ServerFrame};

/// What happened when a join was announced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Peers that were sent the join notice
    pub delivered: usize,
    /// Peers whose transport was already gone
    pub failed: usize,
    /// Whether the private welcome was queued
    pub welcomed: bool,
}

/// Announces new connections to everyone already connected.
///
/// Fan-out cost is O(connected) per join.
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    pool: ConnectionPool,
    include_self: bool,
}

impl PresenceBroadcaster {
    pub fn new(pool: ConnectionPool, include_self: bool) -> Self {
        Self { pool, include_self }
    }

    /// Broadcast the join notice, then send the private welcome.
    pub fn announce_join(&self, handle: &ConnectionHandle) -> JoinReport {
        let except = (!self.include_self).then_some(handle.id.as_str());
        let mut report = JoinReport::default();

        match ServerFrame::notify(join_notice(&handle.identity, &handle.id)).encode() {
            Ok(text) => {
                let broadcast = self.pool.broadcast(&text, except);
                report.delivered = broadcast.delivered;
                report.failed = broadcast.failed;
            }
            Err(e) => warn!(error = %e, "Failed to encode join notice"),
        }

        match ServerFrame::notify(welcome_notice(&handle.identity, &handle.id)).encode() {
            Ok(text) => match handle.send_text(text) {
                Ok(()) => report.welcomed = true,
                Err(e) => warn!(identity = %handle.identity, error = %e, "Failed to send welcome"),
            },
            Err(e) => warn!(error = %e, "Failed to encode welcome"),
        }

        debug!(
            identity = %handle.identity,
            delivered = report.delivered,
            failed = report.failed,
            "Join announced"
        );
        report
    }
}
