//! Signaling implementation layer
//!
//! Everything a connection does lives here; `http/` only adapts sockets
//! and requests onto it.

pub mod dispatcher;
pub mod error;
pub mod messaging;
pub mod session;

pub use dispatcher::{ChannelSender, Dispatcher, MessageSender};
pub use error::{SessionError, SessionResult};
pub use messaging::{StreamMessage, StreamMessageHandler};
pub use session::{Session, SessionContext, SessionState};
