use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::counter::sequence_group;
use crate::error::{Result, SppError};
use crate::header::SegmentLayout;
use crate::primary::SequenceFlags;

/// Identity of the message a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub source: u64,
    pub sequence_group: u16,
}

/// Summary of a partially received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingGroup {
    pub key: GroupKey,
    pub segments: usize,
    pub created: Instant,
}

#[derive(Debug)]
struct Segment {
    flags: SequenceFlags,
    packet: Bytes,
    payload_offset: usize,
}

#[derive(Debug)]
struct Assembler {
    segments: BTreeMap<u32, Segment>,
    created: Instant,
}

impl Assembler {
    fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            created: Instant::now(),
        }
    }

    /// Index of the last segment once a gap-free run `0..=last` with both
    /// end markers is present.
    fn complete_through(&self) -> Option<u32> {
        let first = self.segments.get(&0)?;
        if !first.flags.is_first() {
            return None;
        }
        let (&last, tail) = self.segments.last_key_value()?;
        if !tail.flags.is_last() {
            return None;
        }
        // Keys are unique and ordered, so a full run has exactly last + 1 keys.
        (self.segments.len() as u64 == u64::from(last) + 1).then_some(last)
    }

    /// Segment 0 whole (header included), then every later payload.
    fn concatenate(self) -> Bytes {
        let total = self
            .segments
            .values()
            .enumerate()
            .map(|(i, s)| if i == 0 { s.packet.len() } else { s.packet.len() - s.payload_offset })
            .sum();
        let mut out = BytesMut::with_capacity(total);
        for (index, segment) in self.segments.into_values().enumerate() {
            if index == 0 {
                out.extend_from_slice(&segment.packet);
            } else {
                out.extend_from_slice(&segment.packet[segment.payload_offset..]);
            }
        }
        out.freeze()
    }
}

/// Collects segments of interleaved messages and hands out complete ones.
///
/// A completed message is returned as its first packet followed by the
/// payload bytes of every later packet, so the caller can decode the shared
/// header from the front. Partial groups are never timed out here; callers
/// sweep them with [`Reassembler::evict_older_than`].
pub struct Reassembler<L> {
    layout: L,
    assemblers: HashMap<GroupKey, Assembler>,
    ready: VecDeque<Bytes>,
}

impl<L: SegmentLayout> Reassembler<L> {
    pub fn new(layout: L) -> Self {
        Self {
            layout,
            assemblers: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Add one raw packet.
    ///
    /// A malformed packet is rejected without touching any group.
    pub fn add_segment(&mut self, packet: Bytes) -> Result<()> {
        let info = self.layout.segment_info(&packet)?;
        if info.payload_offset > packet.len() {
            return Err(SppError::Truncated {
                needed: info.payload_offset,
                available: packet.len(),
            });
        }

        let Some(index) = info.segment_index else {
            if info.sequence_flags.is_segmented() {
                return Err(SppError::InvalidHeader(
                    "segmented packet without a segment counter".into(),
                ));
            }
            self.ready.push_back(packet);
            return Ok(());
        };

        let key = GroupKey {
            source: info.source_key,
            sequence_group: sequence_group(info.sequence_count, index),
        };
        let assembler = self.assemblers.entry(key).or_insert_with(Assembler::new);
        if assembler
            .segments
            .insert(
                index,
                Segment {
                    flags: info.sequence_flags,
                    packet,
                    payload_offset: info.payload_offset,
                },
            )
            .is_some()
        {
            debug!(?key, index, "duplicate segment replaced");
        }

        if let Some(last) = assembler.complete_through() {
            if let Some(done) = self.assemblers.remove(&key) {
                trace!(?key, segments = last + 1, "message reassembled");
                self.ready.push_back(done.concatenate());
            }
        }
        Ok(())
    }

    /// Next complete message, if any.
    pub fn poll_ready(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    pub fn pending_groups(&self) -> Vec<PendingGroup> {
        let mut groups: Vec<PendingGroup> = self
            .assemblers
            .iter()
            .map(|(key, assembler)| PendingGroup {
                key: *key,
                segments: assembler.segments.len(),
                created: assembler.created,
            })
            .collect();
        groups.sort_by_key(|g| (g.created, g.key));
        groups
    }

    /// Drop partial groups started more than `age` ago; returns how many.
    pub fn evict_older_than(&mut self, age: Duration) -> usize {
        let now = Instant::now();
        let before = self.assemblers.len();
        self.assemblers.retain(|key, assembler| {
            let keep = now.duration_since(assembler.created) < age;
            if !keep {
                debug!(?key, segments = assembler.segments.len(), "evicting stale segment group");
            }
            keep
        });
        before - self.assemblers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use spacebus_message::{stage, BinaryElementCodec, InteractionType, MessageHeader, OperationId, Uri};

    use super::*;
    use crate::counter::{SegmentCounter, SequenceCounter};
    use crate::header::{FieldSelection, SppHeaderCodec};
    use crate::segmenter::split;

    fn codec() -> SppHeaderCodec {
        SppHeaderCodec::new(247, FieldSelection::all(), Arc::new(BinaryElementCodec))
    }

    fn header(from: &str) -> MessageHeader {
        MessageHeader::new(
            Uri::parse(from).unwrap(),
            Uri::parse("malspp://247/1/0").unwrap(),
            InteractionType::Send,
            stage::SEND,
            1,
            OperationId::new(1, 1, 1, 1),
        )
    }

    fn segment(codec: &SppHeaderCodec, from: &str, body: &[u8], limit: usize, seq: &mut SequenceCounter) -> Vec<Bytes> {
        let parts = codec.encode(&header(from)).unwrap();
        split(limit, &parts.part1, &parts.part2, body, seq, &mut SegmentCounter::new()).unwrap()
    }

    fn body_of(codec: &SppHeaderCodec, message: &Bytes) -> Bytes {
        let decoded = codec.decode(message).unwrap();
        message.slice(decoded.payload_offset..)
    }

    #[test]
    fn interleaved_messages_from_one_source_stay_apart() {
        let codec = codec();
        let first: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let second: Vec<u8> = (0..2000u32).map(|i| (i % 13) as u8 + 100).collect();

        let mut packets = segment(&codec, "malspp://300/9", &first, 256, &mut SequenceCounter::starting_at(5));
        packets.extend(segment(&codec, "malspp://300/9", &second, 256, &mut SequenceCounter::starting_at(500)));
        packets.shuffle(&mut StdRng::seed_from_u64(0x5eed));

        let mut reassembler = Reassembler::new(codec.clone());
        let mut done = Vec::new();
        for packet in packets {
            reassembler.add_segment(packet).unwrap();
            while let Some(message) = reassembler.poll_ready() {
                done.push(body_of(&codec, &message));
            }
        }

        assert_eq!(done.len(), 2);
        done.sort_by_key(|b| b.len());
        assert_eq!(done[0].as_ref(), second.as_slice());
        assert_eq!(done[1].as_ref(), first.as_slice());
        assert!(reassembler.pending_groups().is_empty());
    }

    #[test]
    fn standalone_packet_is_ready_immediately() {
        let codec = codec();
        let packets = segment(&codec, "malspp://300/9", b"tiny", 1024, &mut SequenceCounter::new());
        let mut reassembler = Reassembler::new(codec.clone());
        reassembler.add_segment(packets[0].clone()).unwrap();

        let message = reassembler.poll_ready().unwrap();
        assert_eq!(message, packets[0]);
        assert_eq!(body_of(&codec, &message).as_ref(), b"tiny");
        assert!(reassembler.poll_ready().is_none());
    }

    #[test]
    fn duplicates_overwrite_and_gaps_wait() {
        let codec = codec();
        let body = vec![7u8; 600];
        let packets = segment(&codec, "malspp://300/9", &body, 128, &mut SequenceCounter::new());
        assert!(packets.len() > 3);

        let mut reassembler = Reassembler::new(codec.clone());
        reassembler.add_segment(packets[0].clone()).unwrap();
        reassembler.add_segment(packets[0].clone()).unwrap();
        for packet in &packets[2..] {
            reassembler.add_segment(packet.clone()).unwrap();
        }
        assert!(reassembler.poll_ready().is_none());
        assert_eq!(reassembler.pending_groups()[0].segments, packets.len() - 1);

        reassembler.add_segment(packets[1].clone()).unwrap();
        let message = reassembler.poll_ready().unwrap();
        assert_eq!(body_of(&codec, &message).as_ref(), body.as_slice());
    }

    #[test]
    fn same_sequence_from_different_sources_does_not_mix() {
        let codec = codec();
        let a = vec![1u8; 500];
        let b = vec![2u8; 500];
        let mut packets = segment(&codec, "malspp://300/9", &a, 128, &mut SequenceCounter::new());
        packets.extend(segment(&codec, "malspp://300/10", &b, 128, &mut SequenceCounter::new()));
        packets.shuffle(&mut StdRng::seed_from_u64(3));

        let mut reassembler = Reassembler::new(codec.clone());
        for packet in packets {
            reassembler.add_segment(packet).unwrap();
        }
        let mut bodies = vec![
            body_of(&codec, &reassembler.poll_ready().unwrap()),
            body_of(&codec, &reassembler.poll_ready().unwrap()),
        ];
        bodies.sort();
        assert_eq!(bodies[0].as_ref(), a.as_slice());
        assert_eq!(bodies[1].as_ref(), b.as_slice());
    }

    #[test]
    fn stale_groups_are_evicted() {
        let codec = codec();
        let packets = segment(&codec, "malspp://300/9", &[0u8; 400], 128, &mut SequenceCounter::new());
        let mut reassembler = Reassembler::new(codec);
        reassembler.add_segment(packets[0].clone()).unwrap();

        assert_eq!(reassembler.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(reassembler.pending_groups().len(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(reassembler.evict_older_than(Duration::from_millis(1)), 1);
        assert!(reassembler.pending_groups().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let mut reassembler = Reassembler::new(codec());
        assert!(reassembler.add_segment(Bytes::from_static(&[0, 1, 2])).is_err());
        assert!(reassembler.pending_groups().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn segment_then_reassemble_is_identity(
            limit in 80usize..400,
            factor in 0usize..=10,
            seed in any::<u64>(),
            start in any::<u16>(),
        ) {
            let codec = codec();
            let len = (limit * factor).saturating_sub((seed % 7) as usize);
            let body: Vec<u8> = (0..len).map(|i| (i as u64 ^ seed) as u8).collect();
            let mut packets = segment(&codec, "malspp://300/9", &body, limit, &mut SequenceCounter::starting_at(start));
            packets.shuffle(&mut StdRng::seed_from_u64(seed));

            let mut reassembler = Reassembler::new(codec.clone());
            for packet in packets {
                prop_assert!(packet.len() <= limit);
                reassembler.add_segment(packet).unwrap();
            }
            let message = reassembler.poll_ready().unwrap();
            let message_body = body_of(&codec, &message);
            prop_assert_eq!(message_body.as_ref(), body.as_slice());
            prop_assert!(reassembler.poll_ready().is_none());
        }
    }
}
