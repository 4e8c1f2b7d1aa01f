/// Errors raised by the Space Packet codec and segmentation engine.
#[derive(Debug, thiserror::Error)]
pub enum SppError {
    /// The packet size limit leaves no room for the body.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("truncated packet: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The header is not a Space Packet carrying a message.
    #[error("invalid packet header: {0}")]
    InvalidHeader(String),

    #[error("invalid packet address {uri:?}: {reason}")]
    InvalidAddress { uri: String, reason: String },

    #[error("message error: {0}")]
    Message(#[from] spacebus_message::MessageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link reached end-of-stream on a packet boundary.
    #[error("link closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, SppError>;
