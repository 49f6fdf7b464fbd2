use thiserror::Error;
use watchparty_protocol::ParticipantId;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to the hub")]
    Disconnected,

    #[error("not in a room")]
    NotInRoom,

    #[error("no room is waiting for a password")]
    NoPendingJoin,

    #[error("only the room creator may change the password")]
    NotAuthorized,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("hub transport error: {0}")]
    Transport(String),
}

/// A single peer link failed. Never fatal to the session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PeerError {
    #[error("handshake with {0} timed out")]
    Timeout(ParticipantId),

    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: ParticipantId, reason: String },
}

impl PeerError {
    pub fn peer(&self) -> &ParticipantId {
        match self {
            PeerError::Timeout(peer) => peer,
            PeerError::Handshake { peer, .. } => peer,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
