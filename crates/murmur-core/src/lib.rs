pub mod codec;
pub mod errors;
pub mod ids;
pub mod protocol;

pub use codec::{Frame, LineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use errors::LineError;
pub use ids::ConnectionId;
pub use protocol::{Command, ErrorReason, ServerMessage};
