use std::sync::Arc;

use murmur_core::{ConnectionId, ServerMessage};

use crate::error::{RouteError, SendError};
use crate::handle::ConnectionHandle;
use crate::registry::SessionRegistry;

/// Outcome of one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, SendError)>,
}

/// Broadcast and unicast delivery on top of the registry.
///
/// Recipients are snapshotted under the registry lock, then each send is a
/// non-blocking enqueue made after the lock is released. A slow recipient
/// only fills its own queue.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver one line to one connection.
    pub fn send_to(&self, handle: &ConnectionHandle, message: &ServerMessage) -> Result<(), SendError> {
        let result = handle.try_deliver(message.to_string());
        match &result {
            Err(SendError::QueueFull) => {
                tracing::warn!(conn_id = %handle.id(), "Send queue full, dropping message");
            }
            Err(SendError::Closed) => {
                tracing::debug!(conn_id = %handle.id(), "Send to closed connection");
            }
            Ok(()) => {}
        }
        result
    }

    /// Deliver to every named session except `exclude`.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&ConnectionId>) -> BroadcastReport {
        let recipients = self.registry.named_connections(exclude);
        let line = message.to_string();
        let mut report = BroadcastReport::default();

        for handle in recipients {
            match handle.try_deliver(line.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = %handle.id(), error = %e, "Broadcast delivery failed");
                    report.failed.push((*handle.id(), e));
                }
            }
        }
        report
    }

    /// Send `DM <from> <text>` to the session named `to`.
    pub fn send_direct(&self, from: &str, to: &str, text: &str) -> Result<(), RouteError> {
        let target = self
            .registry
            .lookup_by_name(to)
            .ok_or_else(|| RouteError::UserNotFound(to.to_owned()))?;
        let message = ServerMessage::Dm {
            from: from.to_owned(),
            text: text.to_owned(),
        };
        self.send_to(&target, &message)?;
        Ok(())
    }
}
