use std::fmt;

/// A client command, parsed from one already-trimmed input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `LOGIN <name>`; the name is trimmed and may be empty.
    Login(String),
    /// `MSG <text>`; the text is trimmed and may be empty.
    Msg(String),
    Who,
    Dm { target: String, text: String },
    /// `DM` with a target but no text.
    MalformedDm,
    Ping,
    /// Anything else. Ignored once authenticated.
    Unknown,
}

impl Command {
    /// Parse a line. Callers trim surrounding whitespace first; the keywords
    /// are case-sensitive.
    pub fn parse(line: &str) -> Self {
        if line == "LOGIN" {
            return Self::Login(String::new());
        }
        if let Some(rest) = line.strip_prefix("LOGIN ") {
            return Self::Login(rest.trim().to_owned());
        }
        if let Some(rest) = line.strip_prefix("MSG ") {
            return Self::Msg(rest.trim().to_owned());
        }
        if let Some(rest) = line.strip_prefix("DM ") {
            return match rest.trim().split_once(' ') {
                Some((target, text)) => Self::Dm {
                    target: target.to_owned(),
                    text: text.to_owned(),
                },
                None => Self::MalformedDm,
            };
        }
        match line {
            "WHO" => Self::Who,
            "PING" => Self::Ping,
            _ => Self::Unknown,
        }
    }
}

/// Reason carried by an `ERR` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorReason {
    InvalidUsername,
    UsernameTaken,
    MustLoginFirst,
    InvalidDmFormat,
    UserNotFound(String),
    IdleTimeout,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUsername => f.write_str("invalid-username"),
            Self::UsernameTaken => f.write_str("username-taken"),
            Self::MustLoginFirst => f.write_str("must-login-first"),
            Self::InvalidDmFormat => f.write_str("invalid-dm-format"),
            Self::UserNotFound(name) => write!(f, "user-not-found {name}"),
            Self::IdleTimeout => f.write_str("idle-timeout"),
        }
    }
}

/// A server-to-client line, without the trailing newline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    Ok,
    Err(ErrorReason),
    Pong,
    User(String),
    Msg { from: String, text: String },
    Dm { from: String, text: String },
    Disconnected(String),
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Err(reason) => write!(f, "ERR {reason}"),
            Self::Pong => f.write_str("PONG"),
            Self::User(name) => write!(f, "USER {name}"),
            Self::Msg { from, text } => write!(f, "MSG {from} {text}"),
            Self::Dm { from, text } => write!(f, "DM {from} {text}"),
            Self::Disconnected(name) => write!(f, "INFO {name} disconnected"),
        }
    }
}

impl From<ErrorReason> for ServerMessage {
    fn from(reason: ErrorReason) -> Self {
        Self::Err(reason)
    }
}
