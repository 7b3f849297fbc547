use murmur_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;

/// Routing reference to one connection.
///
/// The registry holds a clone of this for every session. It carries the
/// sending end of the connection's outbound queue and the token that closes
/// the connection; the socket itself stays with the connection's own task.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>, closer: CancellationToken) -> Self {
        Self { id, tx, closer }
    }

    /// Build a handle with a fresh id and queue. Returns the queue's receiver.
    pub fn channel(capacity: usize, closer: CancellationToken) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(ConnectionId::new(), tx, closer), rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue one line without waiting.
    pub fn try_deliver(&self, line: String) -> Result<(), SendError> {
        if self.closer.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the connection to close. Idempotent.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}
