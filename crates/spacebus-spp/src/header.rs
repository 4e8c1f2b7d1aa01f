//! Bit-packed message header for Space Packets.
//!
//! ```text
//! offset  size  field
//! 0       6     primary header (type, secondary header flag, primary APID,
//!               sequence flags, sequence count, data length)
//! 6       1     MAL version (3) | sdu type (5)
//! 7       2     service area
//! 9       2     service
//! 11      2     operation
//! 13      1     area version
//! 14      2     is_error (1) | qos (2) | session (2) | secondary APID (11)
//! 16      2     secondary APID qualifier
//! 18      8     transaction id
//! 26      1     presence flags
//! 27      0/1   source sub-identifier
//! ..      0/1   destination sub-identifier
//! ..      0/4   segment counter
//! ..      var   priority, timestamp, network zone, session name, domain,
//!               authentication id (each only when flagged)
//! ```
//!
//! The primary APID is the destination for telecommands and the source for
//! telemetry; its qualifier is a property of the link and not on the wire.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use spacebus_message::{
    Element, ElementCodec, ElementKind, InteractionType, MessageHeader, QosLevel, SessionType,
    Timestamp, Uri,
};

use crate::error::{Result, SppError};
use crate::primary::{PacketType, PrimaryHeader, SequenceFlags, MAX_APID, PRIMARY_HEADER_SIZE};

pub const PROTOCOL: &str = "malspp";

const MAL_VERSION: u8 = 1;
const FIXED_HEADER_SIZE: usize = 27;
const FLAGS_OFFSET: usize = 26;

/// Size of the segment counter field.
pub const SEGMENT_COUNTER_SIZE: usize = 4;

/// Presence-flag byte, most significant bit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PresenceFlags(pub u8);

impl PresenceFlags {
    pub const SOURCE_ID: u8 = 0x80;
    pub const DESTINATION_ID: u8 = 0x40;
    pub const PRIORITY: u8 = 0x20;
    pub const TIMESTAMP: u8 = 0x10;
    pub const NETWORK_ZONE: u8 = 0x08;
    pub const SESSION_NAME: u8 = 0x04;
    pub const DOMAIN: u8 = 0x02;
    pub const AUTHENTICATION_ID: u8 = 0x01;

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        }
    }
}

/// Optional header fields the encoder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldSelection {
    pub priority: bool,
    pub timestamp: bool,
    pub network_zone: bool,
    pub session_name: bool,
    pub domain: bool,
    pub authentication_id: bool,
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FieldSelection {
    pub fn all() -> Self {
        Self {
            priority: true,
            timestamp: true,
            network_zone: true,
            session_name: true,
            domain: true,
            authentication_id: true,
        }
    }

    pub fn none() -> Self {
        Self {
            priority: false,
            timestamp: false,
            network_zone: false,
            session_name: false,
            domain: false,
            authentication_id: false,
        }
    }

    /// Selection matching the lower six bits of a presence byte.
    pub fn from_flags(flags: PresenceFlags) -> Self {
        Self {
            priority: flags.has(PresenceFlags::PRIORITY),
            timestamp: flags.has(PresenceFlags::TIMESTAMP),
            network_zone: flags.has(PresenceFlags::NETWORK_ZONE),
            session_name: flags.has(PresenceFlags::SESSION_NAME),
            domain: flags.has(PresenceFlags::DOMAIN),
            authentication_id: flags.has(PresenceFlags::AUTHENTICATION_ID),
        }
    }

    fn flags(self) -> PresenceFlags {
        let mut flags = PresenceFlags::default();
        flags.set(PresenceFlags::PRIORITY, self.priority);
        flags.set(PresenceFlags::TIMESTAMP, self.timestamp);
        flags.set(PresenceFlags::NETWORK_ZONE, self.network_zone);
        flags.set(PresenceFlags::SESSION_NAME, self.session_name);
        flags.set(PresenceFlags::DOMAIN, self.domain);
        flags.set(PresenceFlags::AUTHENTICATION_ID, self.authentication_id);
        flags
    }
}

/// Packet-link address: `malspp://<qualifier>/<apid>[/<sub_id>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SppAddress {
    pub qualifier: u16,
    pub apid: u16,
    pub sub_id: Option<u8>,
}

impl SppAddress {
    pub fn new(qualifier: u16, apid: u16, sub_id: Option<u8>) -> Self {
        Self {
            qualifier,
            apid,
            sub_id,
        }
    }

    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let invalid = |reason: &str| SppError::InvalidAddress {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        if uri.protocol() != PROTOCOL {
            return Err(invalid("protocol is not malspp"));
        }
        let qualifier = uri
            .authority()
            .parse::<u16>()
            .map_err(|_| invalid("qualifier is not a 16-bit number"))?;

        let mut path = uri.routing_name().split('/');
        let apid = path
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing apid"))?
            .parse::<u16>()
            .ok()
            .filter(|apid| *apid <= MAX_APID)
            .ok_or_else(|| invalid("apid is not an 11-bit number"))?;
        let sub_id = path
            .next()
            .map(|s| s.parse::<u8>().map_err(|_| invalid("sub id is not an 8-bit number")))
            .transpose()?;
        if path.next().is_some() {
            return Err(invalid("too many path segments"));
        }

        Ok(Self::new(qualifier, apid, sub_id))
    }

    pub fn to_uri(&self) -> Result<Uri> {
        let text = match self.sub_id {
            Some(sub) => format!("{PROTOCOL}://{}/{}/{sub}", self.qualifier, self.apid),
            None => format!("{PROTOCOL}://{}/{}", self.qualifier, self.apid),
        };
        Ok(Uri::parse(&text)?)
    }

    /// Address without the sub-identifier.
    pub fn root(&self) -> Self {
        Self::new(self.qualifier, self.apid, None)
    }
}

/// Header split around the segment counter insertion point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderParts {
    /// Primary header (sequence and length left zero) through the sub-identifiers.
    pub part1: Bytes,
    /// Optional fields selected by the presence flags.
    pub part2: Bytes,
}

impl HeaderParts {
    pub fn len(&self) -> usize {
        self.part1.len() + self.part2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything decoded from the front of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub primary: PrimaryHeader,
    pub header: MessageHeader,
    pub flags: PresenceFlags,
    pub segment_index: Option<u32>,
    /// Offset of the first body byte.
    pub payload_offset: usize,
    pub source_key: u64,
}

/// Where the segment index and body start in a raw packet.
pub trait SegmentLayout {
    fn segment_info(&self, packet: &Bytes) -> Result<SegmentInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub sequence_flags: SequenceFlags,
    pub sequence_count: u16,
    /// `None` for stand-alone packets.
    pub segment_index: Option<u32>,
    pub payload_offset: usize,
    /// Distinguishes sources sharing a link.
    pub source_key: u64,
}

/// Encodes and decodes the packet header of a message.
#[derive(Debug, Clone)]
pub struct SppHeaderCodec {
    qualifier: u16,
    include: FieldSelection,
    elements: Arc<dyn ElementCodec>,
}

impl SppHeaderCodec {
    /// Codec for a link whose primary APIDs belong to `qualifier`.
    pub fn new(qualifier: u16, include: FieldSelection, elements: Arc<dyn ElementCodec>) -> Self {
        Self {
            qualifier,
            include,
            elements,
        }
    }

    pub fn qualifier(&self) -> u16 {
        self.qualifier
    }

    pub fn include(&self) -> FieldSelection {
        self.include
    }

    pub fn elements(&self) -> &Arc<dyn ElementCodec> {
        &self.elements
    }

    /// Length of the header, with the segment counter when `segmented`.
    pub fn header_len(parts: &HeaderParts, segmented: bool) -> usize {
        parts.len() + if segmented { SEGMENT_COUNTER_SIZE } else { 0 }
    }

    pub fn encode(&self, header: &MessageHeader) -> Result<HeaderParts> {
        let from = SppAddress::from_uri(&header.uri_from)?;
        let to = SppAddress::from_uri(&header.uri_to)?;
        let sdu = header
            .interaction_type
            .sdu_type(header.interaction_stage)?;

        let packet_type = if header
            .interaction_type
            .is_initiating(header.interaction_stage)
        {
            PacketType::Telecommand
        } else {
            PacketType::Telemetry
        };
        let (primary, secondary) = match packet_type {
            PacketType::Telecommand => (to, from),
            PacketType::Telemetry => (from, to),
        };
        // The primary qualifier is implied by the link, so it cannot be sent.
        if primary.qualifier != self.qualifier {
            let uri = match packet_type {
                PacketType::Telecommand => &header.uri_to,
                PacketType::Telemetry => &header.uri_from,
            };
            return Err(SppError::InvalidAddress {
                uri: uri.to_string(),
                reason: format!(
                    "qualifier {} is not reachable over a qualifier {} link",
                    primary.qualifier, self.qualifier
                ),
            });
        }

        let mut flags = self.include.flags();
        flags.set(PresenceFlags::SOURCE_ID, from.sub_id.is_some());
        flags.set(PresenceFlags::DESTINATION_ID, to.sub_id.is_some());

        let mut part1 = BytesMut::with_capacity(FIXED_HEADER_SIZE + 2);
        part1.resize(PRIMARY_HEADER_SIZE, 0);
        PrimaryHeader {
            packet_type,
            secondary_header: true,
            apid: primary.apid,
            sequence_flags: SequenceFlags::Standalone,
            sequence_count: 0,
            data_length: 0,
        }
        .encode(&mut part1[..PRIMARY_HEADER_SIZE])?;

        part1.put_u8((MAL_VERSION << 5) | (sdu & 0x1F));
        part1.put_u16(header.service_area);
        part1.put_u16(header.service);
        part1.put_u16(header.operation);
        part1.put_u8(header.area_version);
        part1.put_u16(
            (u16::from(header.is_error_message) << 15)
                | (u16::from(header.qos_level.as_u8() & 0b11) << 13)
                | (u16::from(header.session.as_u8() & 0b11) << 11)
                | (secondary.apid & MAX_APID),
        );
        part1.put_u16(secondary.qualifier);
        part1.put_u64(header.transaction_id);
        part1.put_u8(flags.0);
        if let Some(sub) = from.sub_id {
            part1.put_u8(sub);
        }
        if let Some(sub) = to.sub_id {
            part1.put_u8(sub);
        }

        let codec = self.elements.as_ref();
        let mut part2 = BytesMut::new();
        if flags.has(PresenceFlags::PRIORITY) {
            codec.encode(&Element::UInteger(header.priority), &mut part2)?;
        }
        if flags.has(PresenceFlags::TIMESTAMP) {
            codec.encode(&Element::Time(header.timestamp), &mut part2)?;
        }
        if flags.has(PresenceFlags::NETWORK_ZONE) {
            codec.encode(&Element::Identifier(header.network_zone.clone()), &mut part2)?;
        }
        if flags.has(PresenceFlags::SESSION_NAME) {
            codec.encode(&Element::Identifier(header.session_name.clone()), &mut part2)?;
        }
        if flags.has(PresenceFlags::DOMAIN) {
            codec.encode(&Element::IdentifierList(header.domain.clone()), &mut part2)?;
        }
        if flags.has(PresenceFlags::AUTHENTICATION_ID) {
            codec.encode(&Element::Blob(header.authentication_id.clone()), &mut part2)?;
        }

        Ok(HeaderParts {
            part1: part1.freeze(),
            part2: part2.freeze(),
        })
    }

    /// Decode the header at the front of `packet`.
    ///
    /// Fields absent from the wire take their defaults: priority 0,
    /// timestamp now, empty network zone, session name `LIVE`, empty domain
    /// and empty authentication id.
    pub fn decode(&self, packet: &Bytes) -> Result<DecodedPacket> {
        let primary = PrimaryHeader::decode(packet)?;
        if !primary.secondary_header {
            return Err(SppError::InvalidHeader(
                "secondary header flag not set".into(),
            ));
        }
        if packet.len() < primary.packet_length() {
            return Err(SppError::Truncated {
                needed: primary.packet_length(),
                available: packet.len(),
            });
        }
        if packet.len() < FIXED_HEADER_SIZE {
            return Err(SppError::Truncated {
                needed: FIXED_HEADER_SIZE,
                available: packet.len(),
            });
        }

        let b = packet.as_ref();
        let be16 = |at: usize| u16::from_be_bytes([b[at], b[at + 1]]);

        let mal_version = b[6] >> 5;
        if mal_version != MAL_VERSION {
            return Err(SppError::InvalidHeader(format!(
                "unsupported MAL version {mal_version}"
            )));
        }
        let (interaction_type, interaction_stage) = InteractionType::from_sdu_type(b[6] & 0x1F)?;
        let word = be16(14);
        let is_error_message = word & 0x8000 != 0;
        let qos_level = QosLevel::from_u8(((word >> 13) & 0b11) as u8)?;
        let session = SessionType::from_u8(((word >> 11) & 0b11) as u8)?;
        let secondary_apid = word & MAX_APID;
        let secondary_qualifier = be16(16);
        let mut txn = [0u8; 8];
        txn.copy_from_slice(&b[18..26]);
        let transaction_id = u64::from_be_bytes(txn);
        let flags = PresenceFlags(b[FLAGS_OFFSET]);

        let mut offset = FIXED_HEADER_SIZE;
        let take_u8 = |offset: &mut usize| -> Result<u8> {
            let value = *b.get(*offset).ok_or(SppError::Truncated {
                needed: *offset + 1,
                available: b.len(),
            })?;
            *offset += 1;
            Ok(value)
        };
        let source_sub = if flags.has(PresenceFlags::SOURCE_ID) {
            Some(take_u8(&mut offset)?)
        } else {
            None
        };
        let destination_sub = if flags.has(PresenceFlags::DESTINATION_ID) {
            Some(take_u8(&mut offset)?)
        } else {
            None
        };

        let segment_index = if primary.sequence_flags.is_segmented() {
            let end = offset + SEGMENT_COUNTER_SIZE;
            let raw = b.get(offset..end).ok_or(SppError::Truncated {
                needed: end,
                available: b.len(),
            })?;
            offset = end;
            Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        } else {
            None
        };

        let codec = self.elements.as_ref();
        let mut rest = packet.slice(offset..);
        let before = rest.len();
        let mut field = |flag: u8, kind: ElementKind| -> Result<Option<Element>> {
            if flags.has(flag) {
                Ok(Some(codec.decode(kind, &mut rest)?))
            } else {
                Ok(None)
            }
        };
        let priority = field(PresenceFlags::PRIORITY, ElementKind::UInteger)?
            .map(Element::into_u32)
            .transpose()?
            .unwrap_or(0);
        let timestamp = field(PresenceFlags::TIMESTAMP, ElementKind::Time)?
            .map(Element::into_time)
            .transpose()?
            .unwrap_or_else(Timestamp::now);
        let network_zone = field(PresenceFlags::NETWORK_ZONE, ElementKind::Identifier)?
            .map(Element::into_string)
            .transpose()?
            .unwrap_or_default();
        let session_name = field(PresenceFlags::SESSION_NAME, ElementKind::Identifier)?
            .map(Element::into_string)
            .transpose()?
            .unwrap_or_else(|| SessionType::Live.name().to_string());
        let domain = field(PresenceFlags::DOMAIN, ElementKind::IdentifierList)?
            .map(Element::into_identifier_list)
            .transpose()?
            .unwrap_or_default();
        let authentication_id = field(PresenceFlags::AUTHENTICATION_ID, ElementKind::Blob)?
            .map(Element::into_blob)
            .transpose()?
            .unwrap_or_default();
        let payload_offset = offset + (before - rest.len());

        let primary_side = (self.qualifier, primary.apid);
        let secondary_side = (secondary_qualifier, secondary_apid);
        let ((from_q, from_apid), (to_q, to_apid)) = match primary.packet_type {
            PacketType::Telecommand => (secondary_side, primary_side),
            PacketType::Telemetry => (primary_side, secondary_side),
        };
        let uri_from = SppAddress::new(from_q, from_apid, source_sub).to_uri()?;
        let uri_to = SppAddress::new(to_q, to_apid, destination_sub).to_uri()?;

        let header = MessageHeader {
            uri_from,
            uri_to,
            authentication_id,
            timestamp,
            qos_level,
            priority,
            domain,
            network_zone,
            session,
            session_name,
            interaction_type,
            interaction_stage,
            transaction_id,
            service_area: be16(7),
            service: be16(9),
            operation: be16(11),
            area_version: b[13],
            is_error_message,
        };

        Ok(DecodedPacket {
            primary,
            header,
            flags,
            segment_index,
            payload_offset,
            source_key: source_key(&primary, secondary_apid, secondary_qualifier),
        })
    }
}

fn source_key(primary: &PrimaryHeader, secondary_apid: u16, qualifier: u16) -> u64 {
    (u64::from(primary.packet_type as u8) << 48)
        | (u64::from(primary.apid) << 32)
        | (u64::from(secondary_apid) << 16)
        | u64::from(qualifier)
}

impl SegmentLayout for SppHeaderCodec {
    fn segment_info(&self, packet: &Bytes) -> Result<SegmentInfo> {
        let decoded = self.decode(packet)?;
        Ok(SegmentInfo {
            sequence_flags: decoded.primary.sequence_flags,
            sequence_count: decoded.primary.sequence_count,
            segment_index: decoded.segment_index,
            payload_offset: decoded.payload_offset,
            source_key: decoded.source_key,
        })
    }
}
