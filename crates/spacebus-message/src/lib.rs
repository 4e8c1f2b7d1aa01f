//! Message model for the spacebus transport.
//!
//! A [`Message`] is a [`MessageHeader`] (addressing and interaction
//! metadata), a [`MessageBody`] (positional parts, each decoded, still
//! encoded, or absent) and a bag of quality-of-service properties.
//!
//! Individual payload values are encoded through the [`ElementCodec`]
//! interface; [`BinaryElementCodec`] is the shipped implementation.

pub mod body;
pub mod element;
pub mod error;
pub mod errors;
pub mod header;
pub mod message;
pub mod uri;

pub use body::{decode_body, encode_body, BodyKind, BodyPart, MessageBody};
pub use element::{BinaryElementCodec, Element, ElementCodec, ElementKind};
pub use error::{MessageError, Result};
pub use header::{
    stage, InteractionType, MessageHeader, OperationId, QosLevel, SessionType, Timestamp,
};
pub use message::{Message, QosProperties};
pub use uri::Uri;
