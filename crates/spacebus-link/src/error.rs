/// Errors that can occur in physical link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the link stream.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link address could not be parsed.
    #[error("invalid link address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LinkError>;
