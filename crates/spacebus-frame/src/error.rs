/// Errors raised while framing or unframing messages on a stream link.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream is out of sync: a frame did not start with "SB".
    #[error("invalid frame magic {found:02x?} (expected \"SB\")")]
    InvalidMagic { found: [u8; 2] },

    /// Declared or actual payload length exceeds the configured limit.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of stream on a frame boundary, or a writer that accepts no bytes.
    #[error("connection closed")]
    ConnectionClosed,

    /// End of stream in the middle of a frame.
    #[error("frame truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
