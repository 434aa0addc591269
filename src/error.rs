use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the Bluetooth transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Transport link is not connected")]
    NotConnected,
}

/// The primary error type for the `telink-rs` library.
#[derive(Error, Debug)]
pub enum TelinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid packet length: expected {expected} bytes, got {actual}")]
    InvalidPacketLength { expected: usize, actual: usize },

    #[error("No session key, pairing has not completed")]
    NoSessionKey,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid mesh ID {0:#06x}: expected 1-254 or 0x8000-0x80ff")]
    InvalidMeshId(u32),

    #[error("Unknown command code {0:#04x}")]
    UnknownCommand(u8),

    #[error("Invalid MAC address: {0}")]
    InvalidAddress(String),

    #[error("Pairing rejected by device (opcode {0:#04x})")]
    PairingRejected(u8),

    #[error("Invalid pairing response: {0} bytes")]
    InvalidPairingResponse(usize),

    #[error("Packet authentication failed")]
    AuthenticationFailed,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,
}

/// Coarse classification used to decide between reconnecting and fixing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Link, characteristic or write failure. Recoverable by reconnect or retry.
    Transport,
    /// Locally detected misuse or malformed data. Never reaches the transport.
    Protocol,
}

impl TelinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelinkError::Transport(_) | TelinkError::NotConnected => ErrorKind::Transport,
            _ => ErrorKind::Protocol,
        }
    }
}

/// Failures loading a [`MeshConfig`](crate::MeshConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
