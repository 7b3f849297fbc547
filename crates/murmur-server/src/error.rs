use murmur_core::ConnectionId;

/// Registry consistency errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The connection id is already tracked. Indicates a bug in teardown
    /// ordering, not a client fault.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),
    #[error("username taken: {0}")]
    UsernameTaken(String),
    #[error("session already named: {0}")]
    AlreadyNamed(String),
    #[error("unknown session: {0}")]
    UnknownSession(ConnectionId),
}

/// Best-effort delivery failures for a single connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The outbound queue is full; the line was dropped.
    #[error("send queue full")]
    QueueFull,
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
}

/// Direct-message routing failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("delivery failed: {0}")]
    Delivery(#[from] SendError),
}
