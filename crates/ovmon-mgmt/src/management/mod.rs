//! Management-interface client module root – re-exports public API surface.

pub mod types;
pub mod transport;
pub mod channel;
pub mod parse;
pub mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use transport::{Connector, SocketConnector, SocketTransport, StreamTransport, Transport};
pub use channel::{CommandChannel, MgmtCommands, ReplyDiscipline};
pub use client::VpnClient;
