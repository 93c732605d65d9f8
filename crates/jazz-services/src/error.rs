use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Write gave up after {0} attempts")]
    WriteExhausted(u32),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Unexpected byte {0:#04x} from relay")]
    UnexpectedReply(u8),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
