use crate::element::ElementKind;
use crate::header::InteractionType;

/// Errors raised while building, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The address is not `protocol://authority[/path]`.
    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("unknown interaction type {0}")]
    UnknownInteractionType(u8),

    #[error("stage {stage} is not valid for {interaction_type:?}")]
    InvalidStage {
        interaction_type: InteractionType,
        stage: u8,
    },

    /// The packet-binding interaction code does not map to any type/stage pair.
    #[error("unknown sdu type {0}")]
    UnknownSduType(u8),

    #[error("unknown qos level {0}")]
    UnknownQosLevel(u8),

    #[error("unknown session type {0}")]
    UnknownSessionType(u8),

    /// Input ended before the element or field was complete.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("string element is not valid utf-8")]
    InvalidUtf8,

    #[error("element is too large to encode ({size} bytes)")]
    ElementTooLarge { size: usize },

    /// A decoded element had a different kind than the caller required.
    #[error("expected {expected:?} element, found {found:?}")]
    KindMismatch {
        expected: ElementKind,
        found: ElementKind,
    },

    #[error("invalid presence flag {0:#04x}")]
    InvalidPresenceFlag(u8),

    /// An error body was received without its error number.
    #[error("error body without an error number")]
    MissingErrorNumber,
}

pub type Result<T> = std::result::Result<T, MessageError>;
