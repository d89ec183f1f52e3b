/// Tor control protocol client
///
/// Only the subset needed to manage onion services:
/// - AUTHENTICATE with a control password
/// - ADD_ONION / DEL_ONION
/// - GETINFO queries
///
/// One `Session` owns one connection and runs one command at a time.

pub mod codec;
mod endpoint;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{decode, CodecError, Command, Reply, ReplyDecoder, ReplyLine};
pub use endpoint::{ControlEndpoint, EndpointError, Timeouts};
pub use session::Session;
pub use transport::{Transport, TransportError};

/// Control session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("Cannot reach control port {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Control port authentication failed: {raw}")]
    Auth { code: u16, raw: String },

    #[error("Command rejected by the daemon: {raw}")]
    Command { code: u16, raw: String },

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),
}

impl From<TransportError> for ControlError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect { endpoint, reason } => Self::Connect { endpoint, reason },
            TransportError::Codec(e) => Self::Codec(e),
            other => Self::Transport(other),
        }
    }
}

impl ControlError {
    /// The daemon understood the command and refused it
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Command { .. })
    }
}
