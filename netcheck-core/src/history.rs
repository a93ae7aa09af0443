//! History log
//!
//! Newest-first list of diagnostic records capped at a fixed capacity and
//! persisted as one JSON array under a single store key.

use crate::error::Result;
use crate::network_analyzer::DiagnosticRecord;
use crate::store::{KeyValueStore, get_json, set_json};
use log::debug;

/// Store key holding the serialized log
pub const HISTORY_KEY: &str = "connection_logs";

/// Default number of records kept
pub const DEFAULT_CAPACITY: usize = 20;

pub struct HistoryLog<S> {
    store: S,
    capacity: usize,
}

impl<S: KeyValueStore> HistoryLog<S> {
    /// A capacity of zero is raised to one
    pub fn new(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Persisted records, newest first. Absent or corrupt data reads as empty.
    pub fn load_all(&self) -> Vec<DiagnosticRecord> {
        get_json(&self.store, HISTORY_KEY).unwrap_or_default()
    }

    /// Prepend `record`, evict past capacity and persist in one write
    pub fn append(&mut self, record: DiagnosticRecord) -> Result<Vec<DiagnosticRecord>> {
        let mut records = self.load_all();
        records.insert(0, record);
        records.truncate(self.capacity);

        set_json(&mut self.store, HISTORY_KEY, &records)?;
        debug!("History log now holds {} records", records.len());
        Ok(records)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.store.remove(HISTORY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_analyzer::DiagnosticKind;
    use crate::store::MemoryStore;

    fn latency_record(ms: u32) -> DiagnosticRecord {
        DiagnosticRecord::latency("203.0.113.7", Some(ms))
    }

    #[test]
    fn test_empty_log() {
        let log = HistoryLog::new(MemoryStore::new(), 5);
        assert!(log.load_all().is_empty());
    }

    #[test]
    fn test_append_is_newest_first() {
        let mut log = HistoryLog::new(MemoryStore::new(), 5);
        log.append(latency_record(1)).unwrap();
        log.append(latency_record(2)).unwrap();

        let records = log.load_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].latency_ms(), Some(2));
        assert_eq!(records[1].latency_ms(), Some(1));
    }

    #[test]
    fn test_six_appends_keep_five_newest() {
        let mut log = HistoryLog::new(MemoryStore::new(), 5);
        for ms in 1..=6 {
            log.append(latency_record(ms)).unwrap();
        }

        let latencies: Vec<_> = log.load_all().iter().map(|r| r.latency_ms()).collect();
        assert_eq!(
            latencies,
            vec![Some(6), Some(5), Some(4), Some(3), Some(2)]
        );
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut log = HistoryLog::new(MemoryStore::new(), 3);
        for ms in 0..10 {
            let records = log.append(latency_record(ms)).unwrap();
            assert!(records.len() <= 3);
            assert_eq!(records[0].latency_ms(), Some(ms));
        }
    }

    #[test]
    fn test_load_all_is_idempotent() {
        let mut log = HistoryLog::new(MemoryStore::new(), 5);
        log.append(latency_record(10)).unwrap();
        log.append(DiagnosticRecord::throughput("203.0.113.7", Some(90.0), None))
            .unwrap();

        assert_eq!(log.load_all(), log.load_all());
    }

    #[test]
    fn test_corrupt_log_reads_as_empty() {
        let mut store = MemoryStore::new();
        store.set(HISTORY_KEY, "[{\"kind\": \"nonsense\"").unwrap();
        let mut log = HistoryLog::new(store, 5);
        assert!(log.load_all().is_empty());

        // next append starts over
        let records = log.append(latency_record(7)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), DiagnosticKind::Latency);
    }

    #[test]
    fn test_clear() {
        let mut log = HistoryLog::new(MemoryStore::new(), 5);
        log.append(latency_record(1)).unwrap();
        log.clear().unwrap();
        assert!(log.load_all().is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let mut log = HistoryLog::new(MemoryStore::new(), 0);
        log.append(latency_record(1)).unwrap();
        log.append(latency_record(2)).unwrap();
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.load_all()[0].latency_ms(), Some(2));
    }
}
