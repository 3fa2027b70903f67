use stream_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session has been torn down")]
    TornDown,
}

impl SessionError {
    /// True when the command failed only because the socket is down.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Transport(TransportError::NotConnected))
    }
}
