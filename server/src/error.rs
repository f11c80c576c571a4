use shared::{SessionId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet encoding failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, SyncError>;
