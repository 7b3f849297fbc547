pub mod connection;
pub mod error;
pub mod handle;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use error::{RegistryError, RouteError, SendError};
pub use server::{start, ServerConfig, ServerHandle};
pub use state::{ChatState, ConnectionLimits};
