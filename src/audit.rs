use crate::detector::ConflictRecord;
use std::collections::VecDeque;

/// Append-only conflict history with a rolling cap; the oldest record is
/// evicted once the cap is reached.
#[derive(Debug, Clone)]
pub struct AuditLog {
    records: VecDeque<ConflictRecord>,
    capacity: usize,
    total: u64,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        AuditLog {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn append(&mut self, record: ConflictRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total += 1;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ever appended, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&ConflictRecord> {
        self.records.back()
    }

    /// Newest `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ConflictRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }
}
