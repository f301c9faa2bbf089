use std::collections::VecDeque;
use std::ops::Range;

use catscope_types::ArcLogRecord;

/// A structural change to the buffer, expressed in row indices
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferChange {
    /// Rows removed from the front, indices before removal
    RowsRemoved(Range<usize>),
    /// Rows appended, indices after the removal of the same batch
    RowsInserted(Range<usize>),
    /// Everything was discarded
    Reset,
}

/// Result of applying one batch
#[derive(Clone, Debug, Default)]
pub struct BatchChange {
    /// Front rows evicted to make room
    pub removed: Option<Range<usize>>,

    /// Rows appended at the back
    pub inserted: Option<Range<usize>>,

    /// The evicted records, oldest first
    pub evicted: Vec<ArcLogRecord>,

    /// Records from the batch itself that never fit in the buffer
    pub discarded: usize,
}

impl BatchChange {
    /// Changes in the order observers must apply them: removal, then insertion
    pub fn changes(&self) -> impl Iterator<Item = BufferChange> + '_ {
        self.removed
            .clone()
            .map(BufferChange::RowsRemoved)
            .into_iter()
            .chain(self.inserted.clone().map(BufferChange::RowsInserted))
    }

    pub fn inserted_len(&self) -> usize {
        self.inserted.as_ref().map_or(0, |rows| rows.len())
    }

    pub fn removed_len(&self) -> usize {
        self.removed.as_ref().map_or(0, |rows| rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_none() && self.inserted.is_none()
    }
}

/// Fixed-capacity record store with FIFO eviction.
///
/// Single owner: the drain side is the only writer, so there is no locking.
#[derive(Debug)]
pub struct RetentionBuffer {
    entries: VecDeque<ArcLogRecord>,
    capacity: usize,
}

impl RetentionBuffer {
    /// Create an empty buffer holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a batch, evicting the oldest records first.
    ///
    /// A batch longer than the capacity keeps only its last `capacity`
    /// records. Removal and insertion happen within this call, so no
    /// half-applied batch is ever visible.
    pub fn append_batch(&mut self, mut records: Vec<ArcLogRecord>) -> BatchChange {
        let mut change = BatchChange::default();
        if records.is_empty() {
            return change;
        }

        if records.len() > self.capacity {
            let excess = records.len() - self.capacity;
            records.drain(..excess);
            change.discarded = excess;
        }

        let count = records.len();
        if count == 0 {
            return change;
        }

        let current = self.entries.len();
        let overflow = (current + count).saturating_sub(self.capacity);
        let evict = overflow.min(current);
        if evict > 0 {
            change.evicted = self.entries.drain(..evict).collect();
            change.removed = Some(0..evict);
        }

        let start = self.entries.len();
        self.entries.extend(records);
        change.inserted = Some(start..start + count);
        debug_assert!(self.entries.len() <= self.capacity);

        change
    }

    /// Drop every record, keeping the capacity
    pub fn clear(&mut self) -> BufferChange {
        self.entries.clear();
        BufferChange::Reset
    }

    /// Current record count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in percent, 0 for a zero-capacity buffer
    pub fn fill_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.entries.len() as f64 / self.capacity as f64 * 100.0
    }

    pub fn get(&self, index: usize) -> Option<&ArcLogRecord> {
        self.entries.get(index)
    }

    /// Records oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ArcLogRecord> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Get records in a range (for virtual scrolling)
    pub fn range(&self, start: usize, count: usize) -> Vec<ArcLogRecord> {
        self.entries.iter().skip(start).take(count).cloned().collect()
    }

    /// Get the last N records
    pub fn tail(&self, n: usize) -> Vec<ArcLogRecord> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catscope_types::{LogRecord, Priority};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn record(message: &str) -> ArcLogRecord {
        Arc::new(LogRecord::new(
            "01-01 00:00:00.000",
            "1",
            "1",
            Priority::Info,
            "Test",
            message,
        ))
    }

    fn batch(messages: &[&str]) -> Vec<ArcLogRecord> {
        messages.iter().map(|m| record(m)).collect()
    }

    fn messages(buffer: &RetentionBuffer) -> Vec<String> {
        buffer.iter().map(|r| r.message.clone()).collect()
    }

    #[test]
    fn test_eviction_order() {
        let mut buffer = RetentionBuffer::new(3);
        buffer.append_batch(batch(&["A", "B", "C"]));

        let change = buffer.append_batch(batch(&["D"]));
        assert_eq!(messages(&buffer), vec!["B", "C", "D"]);
        assert_eq!(change.removed, Some(0..1));
        assert_eq!(change.inserted, Some(2..3));

        let change = buffer.append_batch(batch(&["E", "F"]));
        assert_eq!(messages(&buffer), vec!["D", "E", "F"]);
        assert_eq!(change.removed, Some(0..2));
        assert_eq!(change.inserted, Some(1..3));
        let evicted: Vec<_> = change.evicted.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(evicted, vec!["B", "C"]);
    }

    #[test]
    fn test_batch_exceeding_capacity_keeps_tail() {
        let capacity = 10;
        let mut buffer = RetentionBuffer::new(capacity);
        let names: Vec<String> = (0..capacity + 5).map(|i| i.to_string()).collect();
        let records = names.iter().map(|n| record(n)).collect();

        let change = buffer.append_batch(records);
        let expected: Vec<String> = (5..capacity + 5).map(|i| i.to_string()).collect();
        assert_eq!(messages(&buffer), expected);
        assert_eq!(change.removed, None);
        assert_eq!(change.inserted, Some(0..capacity));
        assert_eq!(change.discarded, 5);
    }

    #[test]
    fn test_oversized_batch_into_full_buffer_evicts_everything() {
        let mut buffer = RetentionBuffer::new(2);
        buffer.append_batch(batch(&["A", "B"]));
        let change = buffer.append_batch(batch(&["C", "D", "E"]));
        assert_eq!(messages(&buffer), vec!["D", "E"]);
        assert_eq!(change.removed, Some(0..2));
        assert_eq!(change.inserted, Some(0..2));
    }

    #[test]
    fn test_capacity_invariant_over_many_batches() {
        let capacity = 37;
        let mut buffer = RetentionBuffer::new(capacity);
        let mut appended = 0usize;
        let mut seed = 7u64;

        for _ in 0..200 {
            // Small LCG so batch sizes vary from 0 to 59
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let size = (seed >> 33) as usize % 60;
            let records = (appended..appended + size).map(|i| record(&i.to_string())).collect();
            buffer.append_batch(records);
            appended += size;

            assert!(buffer.len() <= capacity);
            let kept = appended.min(capacity);
            assert_eq!(buffer.len(), kept);
            let expected: Vec<String> =
                (appended - kept..appended).map(|i| i.to_string()).collect();
            assert_eq!(messages(&buffer), expected);
        }
    }

    #[test]
    fn test_changes_are_ordered_remove_then_insert() {
        let mut buffer = RetentionBuffer::new(2);
        buffer.append_batch(batch(&["A", "B"]));
        let change = buffer.append_batch(batch(&["C"]));
        let changes: Vec<_> = change.changes().collect();
        assert_eq!(
            changes,
            vec![BufferChange::RowsRemoved(0..1), BufferChange::RowsInserted(1..2)]
        );
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut buffer = RetentionBuffer::new(2);
        let change = buffer.append_batch(Vec::new());
        assert!(change.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity() {
        let mut buffer = RetentionBuffer::new(0);
        let change = buffer.append_batch(batch(&["A"]));
        assert!(change.is_empty());
        assert_eq!(change.discarded, 1);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.fill_percent(), 0.0);
    }

    #[test]
    fn test_clear_and_fill_percent() {
        let mut buffer = RetentionBuffer::new(4);
        buffer.append_batch(batch(&["A"]));
        assert_eq!(buffer.fill_percent(), 25.0);

        assert_eq!(buffer.clear(), BufferChange::Reset);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);

        buffer.append_batch(batch(&["B", "C", "D", "E"]));
        assert_eq!(buffer.fill_percent(), 100.0);
    }

    #[test]
    fn test_range_and_tail() {
        let mut buffer = RetentionBuffer::new(5);
        buffer.append_batch(batch(&["A", "B", "C", "D"]));
        let range: Vec<_> = buffer.range(1, 2).iter().map(|r| r.message.clone()).collect();
        assert_eq!(range, vec!["B", "C"]);
        let tail: Vec<_> = buffer.tail(3).iter().map(|r| r.message.clone()).collect();
        assert_eq!(tail, vec!["B", "C", "D"]);
        assert_eq!(buffer.get(3).map(|r| r.message.as_str()), Some("D"));
        assert!(buffer.get(4).is_none());
    }
}
