use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::counter::{SegmentCounter, SequenceCounter};
use crate::error::{Result, SppError};
use crate::header::SEGMENT_COUNTER_SIZE;
use crate::primary::{write_sequence, SequenceFlags, MAX_PACKET_SIZE, PRIMARY_HEADER_SIZE};

/// Split an encoded message into packets of at most `limit` bytes.
///
/// `header_part_1` starts with a primary header whose sequence and length
/// fields are filled in per packet. When more than one packet is needed each
/// one carries the segment counter between the two header parts.
///
/// Every packet takes the next value of `sequence_counter`; callers must
/// hold it exclusively for the whole call so one message gets consecutive
/// counts.
pub fn split(
    limit: usize,
    header_part_1: &[u8],
    header_part_2: &[u8],
    body: &[u8],
    sequence_counter: &mut SequenceCounter,
    segment_counter: &mut SegmentCounter,
) -> Result<Vec<Bytes>> {
    if limit > MAX_PACKET_SIZE {
        return Err(SppError::InvalidConfig(format!(
            "packet limit {limit} exceeds the maximum packet size {MAX_PACKET_SIZE}"
        )));
    }
    if header_part_1.len() < PRIMARY_HEADER_SIZE {
        return Err(SppError::InvalidConfig(
            "header does not start with a primary header".into(),
        ));
    }

    let header_len = header_part_1.len() + header_part_2.len();
    if header_len >= limit {
        return Err(SppError::InvalidConfig(format!(
            "header of {header_len} bytes leaves no room for the body in {limit}-byte packets"
        )));
    }

    if header_len + body.len() <= limit {
        let packet = build(
            header_part_1,
            None,
            header_part_2,
            body,
            SequenceFlags::Standalone,
            sequence_counter.next_value(),
        )?;
        return Ok(vec![packet]);
    }

    if header_len + SEGMENT_COUNTER_SIZE >= limit {
        return Err(SppError::InvalidConfig(format!(
            "segmented header of {} bytes leaves no room for the body in {limit}-byte packets",
            header_len + SEGMENT_COUNTER_SIZE
        )));
    }

    let chunk_size = limit - header_len - SEGMENT_COUNTER_SIZE;
    let mut packets = Vec::with_capacity(body.len().div_ceil(chunk_size));
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + chunk_size).min(body.len());
        let flags = SequenceFlags::for_chunk(offset, end, body.len());
        packets.push(build(
            header_part_1,
            Some(segment_counter.next_value()),
            header_part_2,
            &body[offset..end],
            flags,
            sequence_counter.next_value(),
        )?);
        offset = end;
    }

    trace!(
        packets = packets.len(),
        body_len = body.len(),
        limit,
        "segmented message"
    );
    Ok(packets)
}

fn build(
    header_part_1: &[u8],
    segment_index: Option<u32>,
    header_part_2: &[u8],
    chunk: &[u8],
    flags: SequenceFlags,
    sequence_count: u16,
) -> Result<Bytes> {
    let counter_len = if segment_index.is_some() {
        SEGMENT_COUNTER_SIZE
    } else {
        0
    };
    let total = header_part_1.len() + counter_len + header_part_2.len() + chunk.len();
    let data_length = total
        .checked_sub(PRIMARY_HEADER_SIZE + 1)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or_else(|| {
            SppError::InvalidConfig(format!("packet of {total} bytes does not fit the length field"))
        })?;

    let mut packet = BytesMut::with_capacity(total);
    packet.put_slice(header_part_1);
    if let Some(index) = segment_index {
        packet.put_u32(index);
    }
    packet.put_slice(header_part_2);
    packet.put_slice(chunk);
    write_sequence(&mut packet, flags, sequence_count, data_length);
    Ok(packet.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primary::{read_sequence, PrimaryHeader};

    fn header(part1_len: usize, part2_len: usize) -> (Vec<u8>, Vec<u8>) {
        let mut part1 = vec![0xAA; part1_len];
        // Version 0, telecommand, secondary header, APID 5.
        part1[0] = 0x18;
        part1[1] = 0x05;
        (part1, vec![0xBB; part2_len])
    }

    #[test]
    fn ten_thousand_bytes_in_256_byte_packets() {
        let (p1, p2) = header(16, 4);
        let body: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();

        let packets = split(
            256,
            &p1,
            &p2,
            &body,
            &mut SequenceCounter::new(),
            &mut SegmentCounter::new(),
        )
        .unwrap();

        assert_eq!(packets.len(), 44);
        assert!(packets.iter().all(|p| p.len() <= 256));

        let (first, _) = read_sequence(&packets[0]).unwrap();
        assert!(first.is_first() && !first.is_last());
        let (last, _) = read_sequence(&packets[43]).unwrap();
        assert!(!last.is_first() && last.is_last());
        for packet in &packets[1..43] {
            assert_eq!(read_sequence(packet).unwrap().0, SequenceFlags::Continuation);
        }

        let payload: Vec<u8> = packets
            .iter()
            .flat_map(|p| p[16 + SEGMENT_COUNTER_SIZE + 4..].to_vec())
            .collect();
        assert_eq!(payload.len(), 10_000);
        assert_eq!(payload, body);
    }

    #[test]
    fn small_body_is_standalone_without_counter() {
        let (p1, p2) = header(10, 2);
        let mut seq = SequenceCounter::starting_at(7);
        let packets = split(64, &p1, &p2, b"hello", &mut seq, &mut SegmentCounter::new()).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 17);
        let primary = PrimaryHeader::decode(&packets[0]).unwrap();
        assert_eq!(primary.sequence_flags, SequenceFlags::Standalone);
        assert_eq!(primary.sequence_count, 7);
        assert_eq!(primary.packet_length(), 17);
        assert_eq!(seq.peek(), 8);
    }

    #[test]
    fn packets_take_consecutive_counts_and_indices() {
        let (p1, p2) = header(8, 0);
        let mut seq = SequenceCounter::starting_at(16_382);
        let mut seg = SegmentCounter::new();
        let packets = split(20, &p1, &p2, &[1u8; 20], &mut seq, &mut seg).unwrap();

        // 20 - 8 - 4 = 8 body bytes per packet.
        assert_eq!(packets.len(), 3);
        let counts: Vec<u16> = packets.iter().map(|p| read_sequence(p).unwrap().1).collect();
        assert_eq!(counts, vec![16_382, 16_383, 0]);
        let indices: Vec<u32> = packets
            .iter()
            .map(|p| u32::from_be_bytes([p[8], p[9], p[10], p[11]]))
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn header_filling_the_limit_is_rejected() {
        let (p1, p2) = header(10, 6);
        let err = split(16, &p1, &p2, b"", &mut SequenceCounter::new(), &mut SegmentCounter::new())
            .unwrap_err();
        assert!(matches!(err, SppError::InvalidConfig(_)));
    }

    #[test]
    fn no_room_once_counter_is_added() {
        let (p1, p2) = header(10, 6);
        // One body byte fits stand-alone...
        assert!(split(17, &p1, &p2, b"x", &mut SequenceCounter::new(), &mut SegmentCounter::new()).is_ok());
        // ...but a larger body needs the counter, which leaves nothing.
        let err = split(20, &p1, &p2, &[0u8; 8], &mut SequenceCounter::new(), &mut SegmentCounter::new())
            .unwrap_err();
        assert!(matches!(err, SppError::InvalidConfig(_)));
    }

    #[test]
    fn empty_body_is_one_packet() {
        let (p1, p2) = header(7, 0);
        let packets = split(8, &p1, &p2, b"", &mut SequenceCounter::new(), &mut SegmentCounter::new()).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(PrimaryHeader::decode(&packets[0]).unwrap().data_length, 0);
    }

    #[test]
    fn limit_above_length_field_rejected() {
        let (p1, p2) = header(6, 0);
        let err = split(
            MAX_PACKET_SIZE + 1,
            &p1,
            &p2,
            b"",
            &mut SequenceCounter::new(),
            &mut SegmentCounter::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SppError::InvalidConfig(_)));
    }
}
