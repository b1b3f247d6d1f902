//! Windowed hit/miss statistics.
//!
//! [`StatBuffer`] is a bounded ring of sampled event codes. New records
//! overwrite the oldest, so a frequency report reflects roughly the last
//! `capacity` sampled events.

use crate::sync::{AtomicU8, AtomicUsize, Ordering};

/// Sampled find outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stat {
    /// A find located the key.
    FindHit = 1,
    /// A find missed.
    FindMiss = 2,
}

/// Bounded reservoir of sampled event codes.
///
/// Writers claim a slot with a relaxed cursor increment and store their
/// code; readers scan the whole ring. Code 0 marks a never-written slot.
pub struct StatBuffer {
    records: Box<[AtomicU8]>,
    cursor: AtomicUsize,
    mask: usize,
}

impl StatBuffer {
    /// Create a buffer holding `capacity` records, rounded up to a power
    /// of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let records = (0..capacity)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            records,
            cursor: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    /// Number of record slots.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Record one event code, overwriting the oldest record once full.
    pub fn insert_record(&self, stat: Stat) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        self.records[index].store(stat as u8, Ordering::Relaxed);
    }

    /// Count of each observed code, ascending by code. Slots never
    /// written are skipped.
    pub fn frequencies(&self) -> Vec<(u8, u64)> {
        let mut counts = [0u64; 256];
        for record in self.records.iter() {
            counts[record.load(Ordering::Relaxed) as usize] += 1;
        }
        counts
            .iter()
            .enumerate()
            .skip(1) // 0 is the empty sentinel
            .filter(|&(_, &count)| count > 0)
            .map(|(code, &count)| (code as u8, count))
            .collect()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(StatBuffer::new(1000).capacity(), 1024);
        assert_eq!(StatBuffer::new(1024).capacity(), 1024);
    }

    #[test]
    fn test_empty_buffer_reports_nothing() {
        let buffer = StatBuffer::new(16);
        assert!(buffer.frequencies().is_empty());
    }

    #[test]
    fn test_frequencies() {
        let buffer = StatBuffer::new(16);
        for _ in 0..3 {
            buffer.insert_record(Stat::FindHit);
        }
        buffer.insert_record(Stat::FindMiss);

        let freqs = buffer.frequencies();
        assert_eq!(freqs, vec![(Stat::FindHit as u8, 3), (Stat::FindMiss as u8, 1)]);
    }

    #[test]
    fn test_wraparound_keeps_recent_window() {
        let buffer = StatBuffer::new(8);
        for _ in 0..8 {
            buffer.insert_record(Stat::FindMiss);
        }
        // a full lap of hits displaces every miss
        for _ in 0..8 {
            buffer.insert_record(Stat::FindHit);
        }
        assert_eq!(buffer.frequencies(), vec![(Stat::FindHit as u8, 8)]);
    }
}
