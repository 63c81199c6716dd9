use std::collections::VecDeque;

use crate::{LogEntry, sender::LogRecord};

/// Ordered buffer of entries not yet delivered.
///
/// Tracks the summed JSON length of its entries so the size trigger does not
/// need to re-serialize the whole buffer on every write.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: VecDeque<(LogEntry, usize)>,
    serialized_bytes: usize,
}

impl LogBuffer {
    pub fn push(&mut self, entry: LogEntry) {
        let size = entry.serialized_len();
        self.serialized_bytes += size;
        self.entries.push_back((entry, size));
    }

    #[inline]
    pub fn should_flush(&self, max_count: usize, max_size_bytes: usize) -> bool {
        self.entries.len() >= max_count || self.serialized_bytes >= max_size_bytes
    }

    /// Detach every buffered entry as one batch, leaving the buffer empty.
    pub fn take(&mut self) -> Batch {
        let entries = std::mem::take(&mut self.entries);
        let serialized_bytes = std::mem::take(&mut self.serialized_bytes);
        Batch {
            entries,
            serialized_bytes,
        }
    }

    /// Put a batch that failed to deliver back in front of anything written
    /// after it was taken.
    pub fn restore_front(&mut self, mut batch: Batch) {
        batch.entries.append(&mut self.entries);
        self.entries = batch.entries;
        self.serialized_bytes += batch.serialized_bytes;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn serialized_bytes(&self) -> usize {
        self.serialized_bytes
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(entry, _)| entry.message.clone())
            .collect()
    }
}

/// Entries detached from a [`LogBuffer`] for one delivery attempt
#[derive(Debug, Default)]
pub struct Batch {
    entries: VecDeque<(LogEntry, usize)>,
    serialized_bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn serialized_bytes(&self) -> usize {
        self.serialized_bytes
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().map(|(entry, _)| entry)
    }

    /// Wire records in batch order, without consuming the batch so it can be
    /// restored if delivery fails.
    pub fn to_records(&self, extra: &[(String, String)]) -> Vec<LogRecord> {
        self.entries()
            .map(|entry| entry.clone().into_record(extra))
            .collect()
    }
}

#[cfg(test)]
mod buffer_tests {
    use crate::buffer::*;

    fn buffer_of(messages: &[&str]) -> LogBuffer {
        let mut buffer = LogBuffer::default();
        messages
            .iter()
            .for_each(|m| buffer.push(LogEntry::new("info", *m)));
        buffer
    }

    #[test]
    fn test_count_trigger() {
        let mut buffer = buffer_of(&["a", "b"]);
        assert!(!buffer.should_flush(3, usize::MAX));

        buffer.push(LogEntry::new("info", "c"));
        assert!(buffer.should_flush(3, usize::MAX));
    }

    #[test]
    fn test_size_trigger() {
        let entry = LogEntry::new("info", "x".repeat(64));
        let size = entry.serialized_len();

        let mut buffer = LogBuffer::default();
        buffer.push(entry.clone());
        assert_eq!(buffer.serialized_bytes(), size);
        assert!(!buffer.should_flush(100, size * 2));

        buffer.push(entry);
        assert!(buffer.should_flush(100, size * 2));
    }

    #[test]
    fn test_take_clears() {
        let mut buffer = buffer_of(&["a", "b", "c"]);
        let batch = buffer.take();

        assert_eq!(batch.len(), 3);
        assert!(batch.serialized_bytes() > 0);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.serialized_bytes(), 0);

        let messages: Vec<_> = batch.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["a", "b", "c"]);
    }

    #[test]
    fn test_restore_front_keeps_order() {
        let mut buffer = buffer_of(&["a", "b"]);
        let batch = buffer.take();
        let batch_bytes = batch.serialized_bytes();

        buffer.push(LogEntry::new("info", "c"));
        let later_bytes = buffer.serialized_bytes();

        buffer.restore_front(batch);

        assert_eq!(buffer.messages(), ["a", "b", "c"]);
        assert_eq!(buffer.serialized_bytes(), batch_bytes + later_bytes);
    }

    #[test]
    fn test_take_empty() {
        let mut buffer = LogBuffer::default();
        assert!(buffer.take().is_empty());
    }
}
