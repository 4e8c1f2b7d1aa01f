use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::element::{Element, ElementCodec, ElementKind};
use crate::error::{MessageError, Result};
use crate::header::{stage, InteractionType};

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// One positional body part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodyPart {
    /// A value the application built or a codec decoded.
    Decoded(Element),
    /// Element bytes that have not been decoded.
    Encoded(Bytes),
    #[default]
    Absent,
}

impl BodyPart {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Decode an `Encoded` part as `kind`; `Decoded` parts are returned as is.
    pub fn decode(&self, kind: ElementKind, codec: &dyn ElementCodec) -> Result<Option<Element>> {
        match self {
            Self::Decoded(element) => Ok(Some(element.clone())),
            Self::Encoded(bytes) => {
                let mut src = bytes.clone();
                codec.decode(kind, &mut src).map(Some)
            }
            Self::Absent => Ok(None),
        }
    }
}

impl From<Element> for BodyPart {
    fn from(element: Element) -> Self {
        Self::Decoded(element)
    }
}

/// Shape of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Plain,
    Register,
    PublishRegister,
    Publish,
    Notify,
    Deregister,
    Error,
}

impl BodyKind {
    pub fn select(interaction_type: InteractionType, interaction_stage: u8, is_error: bool) -> Self {
        if is_error {
            return Self::Error;
        }
        if interaction_type != InteractionType::PubSub {
            return Self::Plain;
        }
        match interaction_stage {
            stage::PUBSUB_REGISTER => Self::Register,
            stage::PUBSUB_PUBLISH_REGISTER => Self::PublishRegister,
            stage::PUBSUB_PUBLISH => Self::Publish,
            stage::PUBSUB_NOTIFY => Self::Notify,
            stage::PUBSUB_DEREGISTER => Self::Deregister,
            _ => Self::Plain,
        }
    }
}

/// Message body, one variant per [`BodyKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Plain(Vec<BodyPart>),
    Register {
        subscription: BodyPart,
    },
    PublishRegister {
        entity_keys: BodyPart,
    },
    Publish {
        update_header: BodyPart,
        updates: Vec<BodyPart>,
    },
    Notify {
        subscription_id: BodyPart,
        update_header: BodyPart,
        updates: Vec<BodyPart>,
    },
    Deregister {
        identifiers: BodyPart,
    },
    Error {
        number: u32,
        extra: BodyPart,
    },
}

impl Default for MessageBody {
    fn default() -> Self {
        Self::Plain(Vec::new())
    }
}

impl MessageBody {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(number: u32, extra: impl Into<BodyPart>) -> Self {
        Self::Error {
            number,
            extra: extra.into(),
        }
    }

    pub fn kind(&self) -> BodyKind {
        match self {
            Self::Plain(_) => BodyKind::Plain,
            Self::Register { .. } => BodyKind::Register,
            Self::PublishRegister { .. } => BodyKind::PublishRegister,
            Self::Publish { .. } => BodyKind::Publish,
            Self::Notify { .. } => BodyKind::Notify,
            Self::Deregister { .. } => BodyKind::Deregister,
            Self::Error { .. } => BodyKind::Error,
        }
    }

    /// Parts in positional wire order.
    pub fn into_parts(self) -> Vec<BodyPart> {
        match self {
            Self::Plain(parts) => parts,
            Self::Register { subscription } => vec![subscription],
            Self::PublishRegister { entity_keys } => vec![entity_keys],
            Self::Publish {
                update_header,
                updates,
            } => std::iter::once(update_header).chain(updates).collect(),
            Self::Notify {
                subscription_id,
                update_header,
                updates,
            } => [subscription_id, update_header]
                .into_iter()
                .chain(updates)
                .collect(),
            Self::Deregister { identifiers } => vec![identifiers],
            Self::Error { number, extra } => {
                vec![BodyPart::Decoded(Element::UInteger(number)), extra]
            }
        }
    }

    /// Rebuild a body from positional parts; missing trailing parts become `Absent`.
    ///
    /// The codec is only needed to read an encoded error number.
    pub fn from_parts(
        kind: BodyKind,
        parts: Vec<BodyPart>,
        codec: &dyn ElementCodec,
    ) -> Result<Self> {
        fn next(parts: &mut std::vec::IntoIter<BodyPart>) -> BodyPart {
            parts.next().unwrap_or_default()
        }

        let mut parts = parts.into_iter();
        let body = match kind {
            BodyKind::Plain => Self::Plain(parts.collect()),
            BodyKind::Register => Self::Register {
                subscription: next(&mut parts),
            },
            BodyKind::PublishRegister => Self::PublishRegister {
                entity_keys: next(&mut parts),
            },
            BodyKind::Publish => Self::Publish {
                update_header: next(&mut parts),
                updates: parts.collect(),
            },
            BodyKind::Notify => Self::Notify {
                subscription_id: next(&mut parts),
                update_header: next(&mut parts),
                updates: parts.collect(),
            },
            BodyKind::Deregister => Self::Deregister {
                identifiers: next(&mut parts),
            },
            BodyKind::Error => {
                let number = next(&mut parts)
                    .decode(ElementKind::UInteger, codec)?
                    .ok_or(MessageError::MissingErrorNumber)?
                    .into_u32()?;
                Self::Error {
                    number,
                    extra: next(&mut parts),
                }
            }
        };
        Ok(body)
    }
}

/// Append the wire form of `body` to `dst`.
///
/// Wrap mode writes each part as a presence byte followed by a `u32`
/// big-endian length and the element bytes. Inline mode writes the presence
/// byte and the element back to back; encoded parts are written verbatim
/// since they already carry their own presence bytes.
pub fn encode_body(
    body: &MessageBody,
    wrap: bool,
    codec: &dyn ElementCodec,
    dst: &mut BytesMut,
) -> Result<()> {
    let mut scratch = BytesMut::new();
    for part in body.clone().into_parts() {
        match part {
            BodyPart::Absent => dst.put_u8(ABSENT),
            BodyPart::Decoded(element) if wrap => {
                scratch.clear();
                codec.encode(&element, &mut scratch)?;
                put_wrapped(&scratch, dst)?;
            }
            BodyPart::Decoded(element) => {
                dst.put_u8(PRESENT);
                codec.encode(&element, dst)?;
            }
            BodyPart::Encoded(bytes) if wrap => put_wrapped(&bytes, dst)?,
            BodyPart::Encoded(bytes) => dst.put_slice(&bytes),
        }
    }
    Ok(())
}

fn put_wrapped(bytes: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| MessageError::ElementTooLarge { size: bytes.len() })?;
    dst.put_u8(PRESENT);
    dst.put_u32(len);
    dst.put_slice(bytes);
    Ok(())
}

/// Decode a body of `kind` from its wire form.
///
/// Wrapped parts come back as `Encoded`. Inline bodies cannot be split
/// without knowing the element types, so they arrive as one `Encoded` part;
/// error bodies are the exception, their error number is decoded here.
pub fn decode_body(
    kind: BodyKind,
    wrap: bool,
    codec: &dyn ElementCodec,
    mut src: Bytes,
) -> Result<MessageBody> {
    if !wrap {
        return decode_inline(kind, codec, src);
    }

    let mut parts = Vec::new();
    while src.has_remaining() {
        match src.get_u8() {
            ABSENT => parts.push(BodyPart::Absent),
            PRESENT => {
                if src.remaining() < 4 {
                    return Err(MessageError::Truncated {
                        needed: 4,
                        available: src.remaining(),
                    });
                }
                let len = src.get_u32() as usize;
                if src.remaining() < len {
                    return Err(MessageError::Truncated {
                        needed: len,
                        available: src.remaining(),
                    });
                }
                parts.push(BodyPart::Encoded(src.split_to(len)));
            }
            other => return Err(MessageError::InvalidPresenceFlag(other)),
        }
    }
    MessageBody::from_parts(kind, parts, codec)
}

fn decode_inline(kind: BodyKind, codec: &dyn ElementCodec, mut src: Bytes) -> Result<MessageBody> {
    if kind != BodyKind::Error {
        let parts = if src.is_empty() {
            Vec::new()
        } else {
            vec![BodyPart::Encoded(src)]
        };
        return MessageBody::from_parts(kind, parts, codec);
    }

    match src.has_remaining().then(|| src.get_u8()) {
        Some(PRESENT) => {}
        Some(ABSENT) | None => return Err(MessageError::MissingErrorNumber),
        Some(other) => return Err(MessageError::InvalidPresenceFlag(other)),
    }
    let number = codec.decode(ElementKind::UInteger, &mut src)?.into_u32()?;
    let extra = if src.is_empty() {
        BodyPart::Absent
    } else {
        BodyPart::Encoded(src)
    };
    Ok(MessageBody::Error { number, extra })
}
