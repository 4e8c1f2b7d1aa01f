use crate::error::{Result, SppError};

/// Primary header length.
pub const PRIMARY_HEADER_SIZE: usize = 6;

/// Largest packet the 16-bit data length field can describe.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize + 1 + PRIMARY_HEADER_SIZE;

pub const MAX_APID: u16 = 0x07FF;

/// 2-bit segmentation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SequenceFlags {
    Continuation = 0b00,
    First = 0b01,
    Last = 0b10,
    Standalone = 0b11,
}

impl SequenceFlags {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Continuation,
            0b01 => Self::First,
            0b10 => Self::Last,
            _ => Self::Standalone,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_first(self) -> bool {
        matches!(self, Self::First | Self::Standalone)
    }

    pub fn is_last(self) -> bool {
        matches!(self, Self::Last | Self::Standalone)
    }

    pub fn is_segmented(self) -> bool {
        self != Self::Standalone
    }

    /// Marker for the packet carrying `offset..end` of a `total`-byte body.
    pub fn for_chunk(offset: usize, end: usize, total: usize) -> Self {
        match (offset == 0, end >= total) {
            (true, true) => Self::Standalone,
            (true, false) => Self::First,
            (false, true) => Self::Last,
            (false, false) => Self::Continuation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Telemetry = 0,
    Telecommand = 1,
}

/// The 6-byte CCSDS primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub packet_type: PacketType,
    pub secondary_header: bool,
    pub apid: u16,
    pub sequence_flags: SequenceFlags,
    pub sequence_count: u16,
    /// Packet length minus 7.
    pub data_length: u16,
}

impl PrimaryHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PRIMARY_HEADER_SIZE {
            return Err(SppError::Truncated {
                needed: PRIMARY_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let version = (id >> 13) as u8;
        if version != 0 {
            return Err(SppError::InvalidHeader(format!(
                "unsupported packet version {version}"
            )));
        }
        let packet_type = if id & 0x1000 != 0 {
            PacketType::Telecommand
        } else {
            PacketType::Telemetry
        };
        let (sequence_flags, sequence_count) = read_sequence(bytes)?;

        Ok(Self {
            packet_type,
            secondary_header: id & 0x0800 != 0,
            apid: id & MAX_APID,
            sequence_flags,
            sequence_count,
            data_length: u16::from_be_bytes([bytes[4], bytes[5]]),
        })
    }

    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PRIMARY_HEADER_SIZE {
            return Err(SppError::Truncated {
                needed: PRIMARY_HEADER_SIZE,
                available: dst.len(),
            });
        }
        let id = (u16::from(self.packet_type as u8) << 12)
            | (u16::from(self.secondary_header) << 11)
            | (self.apid & MAX_APID);
        dst[0..2].copy_from_slice(&id.to_be_bytes());
        write_sequence(dst, self.sequence_flags, self.sequence_count, self.data_length);
        Ok(())
    }

    /// Full packet length described by this header.
    pub fn packet_length(&self) -> usize {
        usize::from(self.data_length) + PRIMARY_HEADER_SIZE + 1
    }
}

/// Read the segmentation marker and sequence count at offset 2.
pub fn read_sequence(packet: &[u8]) -> Result<(SequenceFlags, u16)> {
    if packet.len() < 4 {
        return Err(SppError::Truncated {
            needed: 4,
            available: packet.len(),
        });
    }
    let word = u16::from_be_bytes([packet[2], packet[3]]);
    Ok((SequenceFlags::from_bits((word >> 14) as u8), word & 0x3FFF))
}

/// Fill bytes 2..6 of a packet whose first 6 bytes are a primary header.
pub(crate) fn write_sequence(packet: &mut [u8], flags: SequenceFlags, count: u16, data_length: u16) {
    let word = (u16::from(flags.bits()) << 14) | (count & 0x3FFF);
    packet[2..4].copy_from_slice(&word.to_be_bytes());
    packet[4..6].copy_from_slice(&data_length.to_be_bytes());
}
