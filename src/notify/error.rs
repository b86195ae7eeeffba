use thiserror::Error;

use crate::api::ApiError;
use crate::notify::codec::CodecError;
use crate::notify::transport::TransportError;

/// Errors returned by notify session operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Invalid caller input, such as an empty topic. Nothing was sent.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The session already reads a topic; only one subscription is allowed.
    #[error("already subscribed to topic {topic:?}")]
    AlreadySubscribed { topic: String },

    /// The command could not be encoded or signed and was not sent.
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// No live connection; a reconnect is in progress.
    #[error("not connected")]
    NotConnected,

    #[error("session is closed")]
    Closed,

    /// The session that produced a delivery has been dropped.
    #[error("owning session is gone")]
    SessionGone,
}

impl NotifyError {
    /// Whether the failure came from the connection rather than the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NotConnected)
    }
}
