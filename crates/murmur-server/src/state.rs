use std::sync::Arc;
use std::time::Duration;

use murmur_core::{ConnectionId, ErrorReason, ServerMessage, DEFAULT_MAX_LINE_LENGTH};
use tokio::time::Instant;

use crate::registry::{RemovedSession, SessionRegistry};
use crate::router::MessageRouter;

/// Per-connection resource limits.
#[derive(Clone, Debug)]
pub struct ConnectionLimits {
    pub max_send_queue: usize,
    pub max_line_length: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_send_queue: 256,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Shared state handed to every connection task and the reaper.
pub struct ChatState {
    registry: Arc<SessionRegistry>,
    router: MessageRouter,
    limits: ConnectionLimits,
}

impl ChatState {
    pub fn new(limits: ConnectionLimits) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        Self {
            registry,
            router,
            limits,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    /// Remove a session, close its connection and, if it was named, tell the
    /// remaining users.
    ///
    /// Safe to call from several tasks for the same session: only the caller
    /// that wins the removal closes and notifies. Returns whether this call
    /// performed the teardown.
    pub fn teardown(&self, id: &ConnectionId) -> bool {
        match self.registry.remove(id) {
            Some(removed) => {
                self.finish_teardown(id, removed);
                true
            }
            None => false,
        }
    }

    /// Evict a session for inactivity: re-check staleness under the registry
    /// lock, send a best-effort `ERR idle-timeout`, then tear down.
    ///
    /// Returns `false` if the session went away or showed activity since it
    /// was found stale.
    pub fn evict_idle(&self, id: &ConnectionId, now: Instant, idle_timeout: Duration) -> bool {
        let Some(removed) = self.registry.remove_if_stale(id, now, idle_timeout) else {
            return false;
        };
        let notice = ServerMessage::Err(ErrorReason::IdleTimeout);
        let _ = self.router.send_to(&removed.handle, &notice);
        self.finish_teardown(id, removed);
        true
    }

    fn finish_teardown(&self, id: &ConnectionId, removed: RemovedSession) {
        removed.handle.close();

        if let Some(username) = removed.username {
            tracing::info!(username = %username, conn_id = %id, "User disconnected");
            self.router
                .broadcast(&ServerMessage::Disconnected(username), None);
        } else {
            tracing::debug!(conn_id = %id, "Unauthenticated connection closed");
        }
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(ConnectionLimits::default())
    }
}
