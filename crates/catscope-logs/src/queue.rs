use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use catscope_types::ArcLogRecord;

/// One item observed by the consumer
#[derive(Clone, Debug)]
pub enum QueueItem {
    Record(ArcLogRecord),
    /// The producer is gone and every record before it has been delivered
    EndOfStream,
}

/// Result of a non-blocking push
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue full, record discarded
    Dropped,
    /// Consumer gone
    Closed,
}

/// Records popped in one drain
#[derive(Debug, Default)]
pub struct DrainBatch {
    pub records: Vec<ArcLogRecord>,
    pub end_of_stream: bool,
}

/// Create a bounded queue holding at most `capacity` records.
///
/// End of stream is the producer being finished or dropped. The consumer sees
/// it only after every queued record, and exactly once.
pub fn channel(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let producer = QueueProducer {
        tx,
        dropped: Arc::clone(&dropped),
    };
    let consumer = QueueConsumer {
        rx,
        capacity,
        dropped,
        finished: false,
    };
    (producer, consumer)
}

/// Sending half, owned by the reader task
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<ArcLogRecord>,
    dropped: Arc<AtomicU64>,
}

impl QueueProducer {
    /// Push without waiting; a full queue discards the record
    pub fn try_push(&self, record: ArcLogRecord) -> PushOutcome {
        match self.tx.try_send(record) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Signal end of stream
    pub fn finish(self) {}

    /// Records discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half, owned by the drain side
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<ArcLogRecord>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    finished: bool,
}

impl QueueConsumer {
    /// Pop one item without waiting
    pub fn try_pop(&mut self) -> Option<QueueItem> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(record) => Some(QueueItem::Record(record)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Some(QueueItem::EndOfStream)
            }
        }
    }

    /// Pop up to `max` records, stopping early at end of stream
    pub fn pop_batch(&mut self, max: usize) -> DrainBatch {
        let mut batch = DrainBatch::default();
        while batch.records.len() < max {
            match self.try_pop() {
                Some(QueueItem::Record(record)) => batch.records.push(record),
                Some(QueueItem::EndOfStream) => {
                    batch.end_of_stream = true;
                    break;
                }
                None => break,
            }
        }
        batch
    }

    /// Records currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Check if end of stream was already reported
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catscope_types::{LogRecord, Priority};

    fn record(n: usize) -> ArcLogRecord {
        Arc::new(LogRecord::new(
            "01-01 00:00:00.000",
            "1",
            "1",
            Priority::Info,
            "Queue",
            n.to_string(),
        ))
    }

    #[test]
    fn test_full_queue_drops_new_records() {
        let (producer, consumer) = channel(3);
        for n in 0..3 {
            assert_eq!(producer.try_push(record(n)), PushOutcome::Queued);
        }
        assert_eq!(producer.try_push(record(3)), PushOutcome::Dropped);
        assert_eq!(consumer.len(), 3);
        assert_eq!(producer.dropped(), 1);
        assert_eq!(consumer.dropped(), 1);
    }

    #[test]
    fn test_batch_preserves_order_and_respects_max() {
        let (producer, mut consumer) = channel(10);
        for n in 0..5 {
            producer.try_push(record(n));
        }
        let batch = consumer.pop_batch(3);
        let messages: Vec<_> = batch.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["0", "1", "2"]);
        assert!(!batch.end_of_stream);
        assert_eq!(consumer.len(), 2);
    }

    #[test]
    fn test_end_of_stream_after_records_exactly_once() {
        let (producer, mut consumer) = channel(10);
        producer.try_push(record(0));
        producer.try_push(record(1));
        producer.finish();

        let batch = consumer.pop_batch(1);
        assert_eq!(batch.records.len(), 1);
        assert!(!batch.end_of_stream);

        let batch = consumer.pop_batch(10);
        assert_eq!(batch.records.len(), 1);
        assert!(batch.end_of_stream);
        assert!(consumer.is_finished());

        let batch = consumer.pop_batch(10);
        assert!(batch.records.is_empty());
        assert!(!batch.end_of_stream);
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn test_dropped_producer_is_end_of_stream() {
        let (producer, mut consumer) = channel(1);
        drop(producer);
        assert!(matches!(consumer.try_pop(), Some(QueueItem::EndOfStream)));
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn test_push_after_consumer_dropped_is_closed() {
        let (producer, consumer) = channel(1);
        drop(consumer);
        assert_eq!(producer.try_push(record(0)), PushOutcome::Closed);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (producer, consumer) = channel(0);
        assert_eq!(consumer.capacity(), 1);
        assert_eq!(producer.try_push(record(0)), PushOutcome::Queued);
    }

    #[test]
    fn test_empty_queue_pops_nothing() {
        let (_producer, mut consumer) = channel(4);
        assert!(consumer.try_pop().is_none());
        assert!(consumer.is_empty());
    }
}
