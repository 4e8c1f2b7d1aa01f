use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MessageError, Result};
use crate::header::Timestamp;

/// Type tag used to ask a codec for a specific element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Boolean,
    UOctet,
    UShort,
    UInteger,
    ULong,
    Integer,
    Long,
    String,
    Identifier,
    Blob,
    Time,
    IdentifierList,
}

/// A single typed payload or header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Boolean(bool),
    UOctet(u8),
    UShort(u16),
    UInteger(u32),
    ULong(u64),
    Integer(i32),
    Long(i64),
    String(String),
    Identifier(String),
    Blob(Bytes),
    Time(Timestamp),
    IdentifierList(Vec<String>),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Boolean(_) => ElementKind::Boolean,
            Self::UOctet(_) => ElementKind::UOctet,
            Self::UShort(_) => ElementKind::UShort,
            Self::UInteger(_) => ElementKind::UInteger,
            Self::ULong(_) => ElementKind::ULong,
            Self::Integer(_) => ElementKind::Integer,
            Self::Long(_) => ElementKind::Long,
            Self::String(_) => ElementKind::String,
            Self::Identifier(_) => ElementKind::Identifier,
            Self::Blob(_) => ElementKind::Blob,
            Self::Time(_) => ElementKind::Time,
            Self::IdentifierList(_) => ElementKind::IdentifierList,
        }
    }

    fn mismatch(&self, expected: ElementKind) -> MessageError {
        MessageError::KindMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Boolean(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::Boolean)),
        }
    }

    pub fn into_u8(self) -> Result<u8> {
        match self {
            Self::UOctet(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::UOctet)),
        }
    }

    pub fn into_u16(self) -> Result<u16> {
        match self {
            Self::UShort(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::UShort)),
        }
    }

    pub fn into_u32(self) -> Result<u32> {
        match self {
            Self::UInteger(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::UInteger)),
        }
    }

    pub fn into_u64(self) -> Result<u64> {
        match self {
            Self::ULong(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::ULong)),
        }
    }

    /// Accepts both strings and identifiers.
    pub fn into_string(self) -> Result<String> {
        match self {
            Self::String(v) | Self::Identifier(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::String)),
        }
    }

    pub fn into_blob(self) -> Result<Bytes> {
        match self {
            Self::Blob(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::Blob)),
        }
    }

    pub fn into_time(self) -> Result<Timestamp> {
        match self {
            Self::Time(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::Time)),
        }
    }

    pub fn into_identifier_list(self) -> Result<Vec<String>> {
        match self {
            Self::IdentifierList(v) => Ok(v),
            other => Err(other.mismatch(ElementKind::IdentifierList)),
        }
    }
}

/// Encodes and decodes individual elements.
///
/// The transport treats this as an opaque service: header fields and
/// decoded body parts go through it, already-encoded parts never do.
pub trait ElementCodec: Send + Sync + fmt::Debug {
    fn encode(&self, element: &Element, dst: &mut BytesMut) -> Result<()>;

    /// Decode one element of `kind`, consuming its bytes from `src`.
    fn decode(&self, kind: ElementKind, src: &mut Bytes) -> Result<Element>;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;
}

/// Fixed-width big-endian encoding.
///
/// Strings, identifiers and blobs carry a `u32` length prefix; identifier
/// lists a `u32` element count.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryElementCodec;

impl BinaryElementCodec {
    fn put_len(len: usize, dst: &mut BytesMut) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| MessageError::ElementTooLarge { size: len })?;
        dst.put_u32(len);
        Ok(())
    }

    fn put_str(value: &str, dst: &mut BytesMut) -> Result<()> {
        Self::put_len(value.len(), dst)?;
        dst.put_slice(value.as_bytes());
        Ok(())
    }

    fn take_str(src: &mut Bytes) -> Result<String> {
        let raw = Self::take_blob(src)?;
        String::from_utf8(raw.to_vec()).map_err(|_| MessageError::InvalidUtf8)
    }

    fn take_blob(src: &mut Bytes) -> Result<Bytes> {
        ensure(src, 4)?;
        let len = src.get_u32() as usize;
        ensure(src, len)?;
        Ok(src.split_to(len))
    }
}

fn ensure(src: &Bytes, needed: usize) -> Result<()> {
    if src.remaining() < needed {
        return Err(MessageError::Truncated {
            needed,
            available: src.remaining(),
        });
    }
    Ok(())
}

impl ElementCodec for BinaryElementCodec {
    fn encode(&self, element: &Element, dst: &mut BytesMut) -> Result<()> {
        match element {
            Element::Boolean(v) => dst.put_u8(u8::from(*v)),
            Element::UOctet(v) => dst.put_u8(*v),
            Element::UShort(v) => dst.put_u16(*v),
            Element::UInteger(v) => dst.put_u32(*v),
            Element::ULong(v) => dst.put_u64(*v),
            Element::Integer(v) => dst.put_i32(*v),
            Element::Long(v) => dst.put_i64(*v),
            Element::String(v) | Element::Identifier(v) => Self::put_str(v, dst)?,
            Element::Blob(v) => {
                Self::put_len(v.len(), dst)?;
                dst.put_slice(v);
            }
            Element::Time(v) => dst.put_u64(v.as_millis()),
            Element::IdentifierList(items) => {
                Self::put_len(items.len(), dst)?;
                for item in items {
                    Self::put_str(item, dst)?;
                }
            }
        }
        Ok(())
    }

    fn decode(&self, kind: ElementKind, src: &mut Bytes) -> Result<Element> {
        let element = match kind {
            ElementKind::Boolean => {
                ensure(src, 1)?;
                Element::Boolean(src.get_u8() != 0)
            }
            ElementKind::UOctet => {
                ensure(src, 1)?;
                Element::UOctet(src.get_u8())
            }
            ElementKind::UShort => {
                ensure(src, 2)?;
                Element::UShort(src.get_u16())
            }
            ElementKind::UInteger => {
                ensure(src, 4)?;
                Element::UInteger(src.get_u32())
            }
            ElementKind::ULong => {
                ensure(src, 8)?;
                Element::ULong(src.get_u64())
            }
            ElementKind::Integer => {
                ensure(src, 4)?;
                Element::Integer(src.get_i32())
            }
            ElementKind::Long => {
                ensure(src, 8)?;
                Element::Long(src.get_i64())
            }
            ElementKind::String => Element::String(Self::take_str(src)?),
            ElementKind::Identifier => Element::Identifier(Self::take_str(src)?),
            ElementKind::Blob => Element::Blob(Self::take_blob(src)?),
            ElementKind::Time => {
                ensure(src, 8)?;
                Element::Time(Timestamp::from_millis(src.get_u64()))
            }
            ElementKind::IdentifierList => {
                ensure(src, 4)?;
                let count = src.get_u32() as usize;
                // Every identifier needs at least its length prefix.
                ensure(src, count.saturating_mul(4))?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::take_str(src)?);
                }
                Element::IdentifierList(items)
            }
        };
        Ok(element)
    }

    fn name(&self) -> &'static str {
        "binary"
    }
}
