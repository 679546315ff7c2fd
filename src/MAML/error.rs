use crate::Transport::{Channel, Peer, TransportError};
use thiserror::Error;

/// Errors surfaced by the message layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("message is not addressed (channel: {channel:?}, peer: {peer:?})")]
    Unaddressed {
        channel: Option<Channel>,
        peer: Option<Peer>,
    },

    #[error("message payload must not be empty")]
    EmptyPayload,

    #[error("message too large for transport: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("transport endpoint already backs a live context")]
    AlreadyInitialized,

    #[error("transport is not ready")]
    TransportNotReady,

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("no handler registered for {0}")]
    NoHandler(Channel),

    #[error("failed to decompress payload: {0}")]
    Decompress(String),

    #[error("cannot start the message layer from a handler running inside a flush")]
    StartInsideFlush,

    #[error("collective failed: {0}")]
    Collective(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("message layer stopped after a fatal error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
