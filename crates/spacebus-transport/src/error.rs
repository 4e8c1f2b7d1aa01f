use spacebus_message::{errors, MessageHeader, OperationId};

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Destination missing or unparseable; fatal to the single send.
    #[error("addressing error: {0}")]
    Addressing(String),

    /// The message names an area, service, operation or version this
    /// transport does not serve. `number` is the matching standard error.
    #[error("unsupported contract {operation} (error {number})")]
    UnsupportedContract { operation: OperationId, number: u32 },

    /// Link-level send failure. The channel to `destination` has been
    /// terminated so the next send reconnects.
    #[error("transmit to {destination} failed: {source}")]
    Transmit {
        destination: String,
        header: Box<MessageHeader>,
        #[source]
        source: Box<TransportError>,
    },

    /// Malformed bytes on a connection.
    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport closed")]
    Closed,

    #[error("no endpoint for {0}")]
    EndpointNotFound(String),

    /// The target endpoint could not take the message.
    #[error("delivery to {endpoint} failed: {reason}")]
    Delivery {
        endpoint: String,
        reason: String,
        number: u32,
    },

    #[error("link error: {0}")]
    Link(#[from] spacebus_link::LinkError),

    #[error("frame error: {0}")]
    Frame(#[from] spacebus_frame::FrameError),

    #[error("space packet error: {0}")]
    Spp(#[from] spacebus_spp::SppError),

    #[error("message error: {0}")]
    Message(#[from] spacebus_message::MessageError),
}

impl TransportError {
    /// Standard error number reported to a remote sender.
    pub fn error_number(&self) -> u32 {
        match self {
            Self::UnsupportedContract { number, .. } | Self::Delivery { number, .. } => *number,
            Self::EndpointNotFound(_) | Self::Addressing(_) => errors::DESTINATION_UNKNOWN,
            Self::Transmit { .. } | Self::Link(_) | Self::Frame(_) => errors::DELIVERY_FAILED,
            Self::Decoding(_) | Self::Message(_) | Self::Spp(_) => errors::BAD_ENCODING,
            Self::Closed => errors::SHUTDOWN,
            Self::Config(_) => errors::INTERNAL,
        }
    }

    /// Whether this error means the physical connection can no longer be trusted.
    pub fn is_decoding(&self) -> bool {
        matches!(self, Self::Decoding(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_for_remote_replies() {
        assert_eq!(
            TransportError::EndpointNotFound("x".into()).error_number(),
            errors::DESTINATION_UNKNOWN
        );
        assert_eq!(TransportError::Closed.error_number(), errors::SHUTDOWN);
        assert_eq!(
            TransportError::UnsupportedContract {
                operation: OperationId::new(1, 2, 3, 4),
                number: errors::UNSUPPORTED_SERVICE,
            }
            .error_number(),
            errors::UNSUPPORTED_SERVICE
        );
        assert!(TransportError::Decoding("bad".into()).is_decoding());
    }
}
