use std::sync::Arc;

use murmur_core::{Command, ConnectionId, ErrorReason, ServerMessage};
use tokio::time::Instant;

use crate::error::{RegistryError, RouteError};
use crate::handle::ConnectionHandle;
use crate::state::ChatState;

/// Protocol phase of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Authenticated { username: String },
    Terminated,
}

/// Per-connection protocol logic.
///
/// Consumes input lines one at a time and drives the registry and router.
/// Replies are queued on the session's own connection, so they reach the
/// client in the order the commands were received.
pub struct Session {
    chat: Arc<ChatState>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    /// Register the connection as an unauthenticated session.
    pub fn open(
        chat: Arc<ChatState>,
        handle: ConnectionHandle,
        now: Instant,
    ) -> Result<Self, RegistryError> {
        chat.registry().register_unauthenticated(handle.clone(), now)?;
        Ok(Self {
            chat,
            handle,
            state: SessionState::Authenticating,
        })
    }

    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Record input received at `now` that produced no command, such as a
    /// discarded overlong line.
    pub fn note_activity(&self, now: Instant) {
        if self.state != SessionState::Terminated {
            self.chat.registry().touch_activity(self.handle.id(), now);
        }
    }

    /// Process one raw input line received at `now`.
    pub fn handle_line(&mut self, raw: &str, now: Instant) {
        if self.state == SessionState::Terminated || self.handle.is_closed() {
            return;
        }
        self.note_activity(now);

        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        let command = Command::parse(line);

        match &self.state {
            SessionState::Authenticating => self.handle_login(command),
            SessionState::Authenticated { username } => {
                let username = username.clone();
                self.dispatch(&username, command);
            }
            SessionState::Terminated => {}
        }
    }

    fn handle_login(&mut self, command: Command) {
        let Command::Login(name) = command else {
            self.reply(&ErrorReason::MustLoginFirst.into());
            return;
        };
        if name.is_empty() {
            self.reply(&ErrorReason::InvalidUsername.into());
            return;
        }

        match self.chat.registry().try_bind_username(self.handle.id(), &name) {
            Ok(()) => {
                tracing::info!(username = %name, conn_id = %self.handle.id(), "User logged in");
                self.state = SessionState::Authenticated { username: name };
                self.reply(&ServerMessage::Ok);
            }
            Err(RegistryError::UsernameTaken(_)) => {
                self.reply(&ErrorReason::UsernameTaken.into());
            }
            Err(e) => {
                // Evicted between the read and the bind.
                tracing::debug!(conn_id = %self.handle.id(), error = %e, "Login on a removed session");
            }
        }
    }

    fn dispatch(&self, username: &str, command: Command) {
        let router = self.chat.router();
        match command {
            Command::Msg(text) => {
                if !text.is_empty() {
                    let message = ServerMessage::Msg {
                        from: username.to_owned(),
                        text,
                    };
                    router.broadcast(&message, Some(self.handle.id()));
                }
            }
            Command::Who => {
                for name in self.chat.registry().list_names() {
                    self.reply(&ServerMessage::User(name));
                }
            }
            Command::Dm { target, text } => match router.send_direct(username, &target, &text) {
                Ok(()) | Err(RouteError::Delivery(_)) => {}
                Err(RouteError::UserNotFound(missing)) => {
                    self.reply(&ErrorReason::UserNotFound(missing).into());
                }
            },
            Command::MalformedDm => self.reply(&ErrorReason::InvalidDmFormat.into()),
            Command::Ping => self.reply(&ServerMessage::Pong),
            Command::Login(_) | Command::Unknown => {}
        }
    }

    fn reply(&self, message: &ServerMessage) {
        let _ = self.chat.router().send_to(&self.handle, message);
    }

    /// Leave the session: run the shared teardown and close the connection.
    /// Calling it again is a no-op.
    pub fn terminate(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.chat.teardown(self.handle.id());
        self.handle.close();
        self.state = SessionState::Terminated;
    }
}
