//! CCSDS Space Packet binding for spacebus.
//!
//! Messages travel as one or more Space Packets. Each packet carries the
//! bit-packed message header ([`SppHeaderCodec`]); a message too large for
//! one packet is cut by [`split`] into first/continuation/last packets that
//! share a sequence identity, and glued back together by the
//! [`Reassembler`], which tolerates interleaving and reordering.

pub mod codec;
pub mod counter;
pub mod error;
pub mod header;
pub mod io;
pub mod primary;
pub mod reassembler;
pub mod segmenter;

pub use codec::SppMessageCodec;
pub use counter::{sequence_group, SegmentCounter, SequenceCounter, SEQUENCE_COUNT_RANGE};
pub use error::{Result, SppError};
pub use header::{
    DecodedPacket, FieldSelection, HeaderParts, PresenceFlags, SegmentInfo, SegmentLayout,
    SppAddress, SppHeaderCodec, PROTOCOL, SEGMENT_COUNTER_SIZE,
};
pub use io::{PacketReader, PacketWriter};
pub use primary::{PacketType, PrimaryHeader, SequenceFlags, MAX_PACKET_SIZE, PRIMARY_HEADER_SIZE};
pub use reassembler::{GroupKey, PendingGroup, Reassembler};
pub use segmenter::split;
