/// Errors raised while reading lines off the byte stream.
///
/// Malformed UTF-8 and overlong lines are not errors: the codec repairs or
/// skips them. Only transport failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::ConnectionReset => "connection_reset",
            Self::Io(_) => "io",
        }
    }
}
