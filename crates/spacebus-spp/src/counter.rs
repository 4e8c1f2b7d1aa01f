//! Wrapping packet counters.

/// Number of distinct packet sequence counts (14-bit field).
pub const SEQUENCE_COUNT_RANGE: u16 = 1 << 14;

/// Largest packet sequence count.
pub const MAX_SEQUENCE_COUNT: u16 = SEQUENCE_COUNT_RANGE - 1;

/// Per-source packet sequence counter, modulo 2^14.
///
/// Shared by all traffic leaving one transport; callers hold it exclusively
/// for the duration of one message split so its packets get consecutive
/// counts.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u16,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose next value is `value` (taken modulo the range).
    pub fn starting_at(value: u16) -> Self {
        Self {
            next: value % SEQUENCE_COUNT_RANGE,
        }
    }

    /// Return the current count and advance.
    pub fn next_value(&mut self) -> u16 {
        let value = self.next;
        self.next = if value == MAX_SEQUENCE_COUNT { 0 } else { value + 1 };
        value
    }

    pub fn peek(&self) -> u16 {
        self.next
    }
}

/// Segment counter of one logical message, modulo 2^32.
#[derive(Debug, Clone, Default)]
pub struct SegmentCounter {
    next: u32,
}

impl SegmentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(value: u32) -> Self {
        Self { next: value }
    }

    pub fn next_value(&mut self) -> u32 {
        let value = self.next;
        self.next = value.wrapping_add(1);
        value
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Sequence count of the first packet of the message a segment belongs to.
///
/// Only unique while the source never reuses a sequence count for a second
/// in-flight message before the first finished reassembling.
pub fn sequence_group(sequence_count: u16, segment_index: u32) -> u16 {
    let range = u32::from(SEQUENCE_COUNT_RANGE);
    let offset = segment_index % range;
    ((u32::from(sequence_count % SEQUENCE_COUNT_RANGE) + range - offset) % range) as u16
}
