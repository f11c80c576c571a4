use shared::TransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no game loaded")]
    NoActiveGame,
    #[error("action rejected locally: {0}")]
    Rejected(#[from] TransitionError),
    #[error("invalid server address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet encoding failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("server refused connection: {0}")]
    Refused(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
