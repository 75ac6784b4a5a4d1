use crate::connection::ConnectionState;
use crate::protocol_types::primitives::VarInt;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// Failure reaching or understanding the session server.
#[derive(Debug)]
pub(crate) enum AuthError {
    Transport(String),
    Status(u16),
    MalformedResponse(String),
    CorruptProperty,
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Transport(e) => write!(f, "session server unreachable: {}", e),
            AuthError::Status(code) => write!(f, "session server answered {}", code),
            AuthError::MalformedResponse(e) => write!(f, "malformed session response: {}", e),
            AuthError::CorruptProperty => {
                write!(f, "property value appeared before its name, response is corrupt")
            }
        }
    }
}

impl Error for AuthError {}

#[derive(Debug)]
pub(crate) enum ProtError {
    UnknownPacket(ConnectionState, VarInt),
    InvalidNextState(VarInt),
    InvalidTransition(ConnectionState, ConnectionState),
    Malformed(String),
    TeleportIdMismatch(VarInt, VarInt),
    UnsolicitedPluginResponse(VarInt),
    OutdatedClient(i32),
    OutdatedServer(i32),
    VerifyTokenMismatch,
    Crypto(String),
    Auth(AuthError),
    Io(std::io::Error),
    Any(String),
}

impl ProtError {
    /// Every error ends the connection; this only selects how loudly it is logged.
    pub(crate) fn is_external(&self) -> bool {
        matches!(self, ProtError::Auth(_))
    }
}

impl Display for ProtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtError::UnknownPacket(state, id) => {
                write!(f, "Unrecognized packet with id 0x{:x} in state {:?}", id.value, state)
            }
            ProtError::InvalidNextState(v) => write!(f, "Invalid next state: {}", v),
            ProtError::InvalidTransition(from, to) => {
                write!(f, "Invalid state transition: {:?} -> {:?}", from, to)
            }
            ProtError::Malformed(v) => write!(f, "Malformed packet: {}", v),
            ProtError::TeleportIdMismatch(v1, v2) => {
                write!(f, "Teleport id mismatch: {} != {}", v1, v2)
            }
            ProtError::UnsolicitedPluginResponse(id) => {
                write!(f, "Login plugin response for unknown message id {}", id)
            }
            ProtError::OutdatedClient(v) => write!(f, "Outdated client (protocol {})", v),
            ProtError::OutdatedServer(v) => write!(f, "Outdated server (client protocol {})", v),
            ProtError::VerifyTokenMismatch => write!(f, "Verify token mismatch"),
            ProtError::Crypto(v) => write!(f, "Crypto error: {}", v),
            ProtError::Auth(e) => write!(f, "Authentication failed: {}", e),
            ProtError::Io(e) => write!(f, "IO error: {}", e),
            ProtError::Any(v) => write!(f, "{}", v),
        }
    }
}

impl Error for ProtError {}

impl From<String> for ProtError {
    fn from(s: String) -> Self {
        ProtError::Malformed(s)
    }
}

impl From<AuthError> for ProtError {
    fn from(e: AuthError) -> Self {
        ProtError::Auth(e)
    }
}

impl From<std::io::Error> for ProtError {
    fn from(e: std::io::Error) -> Self {
        ProtError::Io(e)
    }
}

impl From<openssl::error::ErrorStack> for ProtError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        ProtError::Crypto(format!("{e}"))
    }
}
