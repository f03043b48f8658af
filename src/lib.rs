pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod history;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod service;
pub mod storage;
pub mod store;
pub mod validate;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::filter::BloomFilter;
use crate::model::{Calculation, CalculationRecord, LogEntry, Operation};
use crate::storage::Segment;
use crate::store::RecordStore;

const BLOOM_CAPACITY: usize = 1_000_000;
const BLOOM_FP_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Creation order, kept across updates.
    seq: u64,
    /// Offset of the latest `Put` for this id.
    offset: u64,
}

#[derive(Debug, Default)]
struct Index {
    slots: HashMap<u128, Slot>,
    next_seq: u64,
    /// Log entries no longer reachable from `slots`.
    garbage: u64,
}

impl Index {
    fn put(&mut self, id: u128, offset: u64) {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.offset = offset;
                self.garbage += 1;
            }
            None => {
                self.slots.insert(id, Slot { seq: self.next_seq, offset });
                self.next_seq += 1;
            }
        }
    }

    fn delete(&mut self, id: u128) {
        if self.slots.remove(&id).is_some() {
            // the removed put and the tombstone itself
            self.garbage += 2;
        } else {
            self.garbage += 1;
        }
    }

    fn ordered(&self) -> Vec<(u128, Slot)> {
        let mut slots: Vec<(u128, Slot)> = self.slots.iter().map(|(id, slot)| (*id, *slot)).collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
    }
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub live_records: usize,
    pub dropped_entries: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Durable calculation history backed by a single append-only log.
///
/// The index maps each live id to the offset of its latest `Put`. Locks are
/// always taken index first, then segment.
pub struct AbacusDb {
    active_segment: Mutex<Segment>,
    index: RwLock<Index>,
    bloom_filter: RwLock<BloomFilter>,
}

impl fmt::Debug for AbacusDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbacusDb")
        .field("records", &self.len())
        .finish()
    }
}

impl AbacusDb {
    /// Opens (or creates) the log at `path` and rebuilds the index from it.
    pub fn open(path: &Path, strict_durability: bool) -> Result<Self, StoreError> {
        let mut segment = Segment::new(path, strict_durability)?;
        let entries = segment.replay()?;

        let mut index = Index::default();
        let mut bloom_filter = BloomFilter::new(BLOOM_CAPACITY, BLOOM_FP_RATE);
        let replayed = entries.len();

        for (offset, entry) in entries {
            match entry {
                LogEntry::Put(record) => {
                    bloom_filter.insert(record.id);
                    index.put(record.id, offset);
                }
                LogEntry::Delete { id } => index.delete(id),
            }
        }

        info!(
            path = %path.display(),
            entries = replayed,
            records = index.slots.len(),
            "Opened calculation log"
        );

        Ok(Self {
            active_segment: Mutex::new(segment),
            index: RwLock::new(index),
            bloom_filter: RwLock::new(bloom_filter),
        })
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.read().map(|idx| idx.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log entries a compaction would drop.
    pub fn garbage(&self) -> u64 {
        self.index.read().map(|idx| idx.garbage).unwrap_or(0)
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, Index>, StoreError> {
        self.index.read().map_err(|_| StoreError::LockPoisoned("index"))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, Index>, StoreError> {
        self.index.write().map_err(|_| StoreError::LockPoisoned("index"))
    }

    fn lock_segment(&self) -> Result<MutexGuard<'_, Segment>, StoreError> {
        self.active_segment.lock().map_err(|_| StoreError::LockPoisoned("segment"))
    }

    fn remember(&self, id: u128) -> Result<(), StoreError> {
        let mut bf = self.bloom_filter.write().map_err(|_| StoreError::LockPoisoned("bloom filter"))?;
        bf.insert(id);
        Ok(())
    }

    fn might_contain(&self, id: u128) -> Result<bool, StoreError> {
        let bf = self.bloom_filter.read().map_err(|_| StoreError::LockPoisoned("bloom filter"))?;
        Ok(bf.might_contain(id))
    }

    /// Rewrites the log with only the live records, in creation order, and
    /// swaps it in place of the current one.
    pub fn compact(&self) -> Result<CompactionStats, StoreError> {
        // Stop-the-world: nothing may append while offsets are being rewritten.
        let mut index_lock = self.write_index()?;
        let mut segment_lock = self.lock_segment()?;
        let mut bloom_lock = self.bloom_filter.write().map_err(|_| StoreError::LockPoisoned("bloom filter"))?;

        let old_path = segment_lock.file_path.clone();
        let new_path = old_path.with_extension("compacted");
        let strict = segment_lock.strict_durability();
        let bytes_before = segment_lock.len();
        let dropped_entries = index_lock.garbage;

        if new_path.exists() {
            fs::remove_file(&new_path)?;
        }
        let mut new_segment = Segment::new(&new_path, false)?;

        let mut new_index = Index::default();
        let mut bloom_filter = BloomFilter::new(BLOOM_CAPACITY, BLOOM_FP_RATE);

        for (id, slot) in index_lock.ordered() {
            let record = read_record(&segment_lock, slot.offset)?;
            let offset = new_segment.append(&LogEntry::Put(record))?;
            new_index.slots.insert(id, Slot { seq: slot.seq, offset });
            bloom_filter.insert(id);
        }
        new_index.next_seq = index_lock.next_seq;
        new_segment.sync()?;

        // rename(2) replaces the old log atomically; the open handle follows it
        fs::rename(&new_path, &old_path)?;
        *segment_lock = new_segment.renamed(&old_path, strict);

        let stats = CompactionStats {
            live_records: new_index.slots.len(),
            dropped_entries,
            bytes_before,
            bytes_after: segment_lock.len(),
        };

        *index_lock = new_index;
        *bloom_lock = bloom_filter;

        info!(
            live = stats.live_records,
            dropped = stats.dropped_entries,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "Compaction complete"
        );
        Ok(stats)
    }
}

fn read_record(segment: &Segment, offset: u64) -> Result<CalculationRecord, StoreError> {
    match segment.read(offset)? {
        LogEntry::Put(record) => Ok(record),
        LogEntry::Delete { .. } => Err(StoreError::Corrupt {
            offset,
            reason: "index points at a tombstone".to_string(),
        }),
    }
}

impl RecordStore for AbacusDb {
    fn insert(&self, calc: Calculation) -> Result<CalculationRecord, StoreError> {
        let record = CalculationRecord::new(Uuid::new_v4(), calc);

        let mut index = self.write_index()?;
        let offset = {
            let mut segment = self.lock_segment()?;
            segment.append(&LogEntry::Put(record.clone()))?
        };
        index.put(record.id, offset);
        self.remember(record.id)?;

        debug!(id = %record.uuid(), offset, "Inserted record");
        Ok(record)
    }

    fn find(&self, operation: Option<Operation>) -> Result<Vec<CalculationRecord>, StoreError> {
        let index = self.read_index()?;
        let segment = self.lock_segment()?;

        let mut records = Vec::with_capacity(index.slots.len());
        for (_, slot) in index.ordered() {
            let record = read_record(&segment, slot.offset)?;
            if operation.map_or(true, |op| record.operation == op) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CalculationRecord>, StoreError> {
        if !self.might_contain(id.as_u128())? {
            return Ok(None);
        }

        let index = self.read_index()?;
        let Some(slot) = index.slots.get(&id.as_u128()).copied() else {
            return Ok(None);
        };
        let segment = self.lock_segment()?;
        read_record(&segment, slot.offset).map(Some)
    }

    fn replace(&self, id: Uuid, calc: Calculation) -> Result<Option<CalculationRecord>, StoreError> {
        let mut index = self.write_index()?;
        let Some(slot) = index.slots.get(&id.as_u128()).copied() else {
            return Ok(None);
        };

        let mut record = CalculationRecord::new(id, calc);
        let offset = {
            let mut segment = self.lock_segment()?;
            let previous = read_record(&segment, slot.offset)?;
            // Millisecond clock: two writes can land on the same tick.
            record.timestamp = record.timestamp.max(previous.timestamp + 1);
            segment.append(&LogEntry::Put(record.clone()))?
        };
        index.put(record.id, offset);

        debug!(%id, offset, "Replaced record");
        Ok(Some(record))
    }

    fn remove(&self, id: Uuid) -> Result<Option<CalculationRecord>, StoreError> {
        let mut index = self.write_index()?;
        let Some(slot) = index.slots.get(&id.as_u128()).copied() else {
            return Ok(None);
        };

        let previous = {
            let mut segment = self.lock_segment()?;
            let previous = read_record(&segment, slot.offset)?;
            segment.append(&LogEntry::Delete { id: id.as_u128() })?;
            previous
        };
        index.delete(id.as_u128());

        debug!(%id, "Removed record");
        Ok(Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(operation: Operation, a: f64, b: f64) -> Calculation {
        let result = operation.apply(a, b).unwrap();
        Calculation { operation, operand1: a, operand2: b, result, timestamp: 1_700_000_000_000 }
    }

    fn open(dir: &tempfile::TempDir) -> AbacusDb {
        AbacusDb::open(&dir.path().join("calculations.log"), false).unwrap()
    }

    #[test]
    fn insert_assigns_ids_and_find_keeps_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let a = db.insert(calc(Operation::Add, 2.0, 3.0)).unwrap();
        let b = db.insert(calc(Operation::Divide, 10.0, 4.0)).unwrap();
        let c = db.insert(calc(Operation::Add, 1.0, 1.0)).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(db.len(), 3);
        assert_eq!(db.find(None).unwrap(), vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(db.find(Some(Operation::Add)).unwrap(), vec![a, c]);
        assert!(db.find(Some(Operation::Power)).unwrap().is_empty());
        assert_eq!(db.find_by_id(b.uuid()).unwrap(), Some(b));
        assert_eq!(db.find_by_id(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn replace_keeps_id_and_position() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let first = db.insert(calc(Operation::Divide, 10.0, 4.0)).unwrap();
        let second = db.insert(calc(Operation::Add, 1.0, 1.0)).unwrap();

        let updated = db.replace(first.uuid(), calc(Operation::Power, 2.0, 10.0)).unwrap().unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.result, 1024.0);

        assert_eq!(db.find(None).unwrap(), vec![updated, second]);
        assert_eq!(db.replace(Uuid::new_v4(), calc(Operation::Add, 1.0, 1.0)).unwrap(), None);
    }

    #[test]
    fn replace_always_moves_the_timestamp_forward() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let record = db.insert(calc(Operation::Add, 1.0, 1.0)).unwrap();
        let same_tick = db.replace(record.uuid(), calc(Operation::Add, 2.0, 2.0)).unwrap().unwrap();
        assert_eq!(same_tick.timestamp, record.timestamp + 1);

        let mut later = calc(Operation::Add, 3.0, 3.0);
        later.timestamp += 60_000;
        let later = db.replace(record.uuid(), later).unwrap().unwrap();
        assert_eq!(later.timestamp, record.timestamp + 60_000);
    }

    #[test]
    fn remove_returns_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let record = db.insert(calc(Operation::Modulo, 10.0, 3.0)).unwrap();
        assert_eq!(db.remove(record.uuid()).unwrap(), Some(record.clone()));
        assert_eq!(db.find_by_id(record.uuid()).unwrap(), None);
        assert_eq!(db.remove(record.uuid()).unwrap(), None);
        assert!(db.is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (kept, updated) = {
            let db = open(&dir);
            let kept = db.insert(calc(Operation::Add, 2.0, 3.0)).unwrap();
            let doomed = db.insert(calc(Operation::Subtract, 2.0, 3.0)).unwrap();
            let target = db.insert(calc(Operation::Divide, 1.0, 4.0)).unwrap();
            db.remove(doomed.uuid()).unwrap();
            let updated = db.replace(target.uuid(), calc(Operation::Multiply, 3.0, 4.0)).unwrap().unwrap();
            (kept, updated)
        };

        let db = open(&dir);
        assert_eq!(db.find(None).unwrap(), vec![kept, updated]);
        assert_eq!(db.garbage(), 3);
    }

    #[test]
    fn compaction_drops_dead_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        let a = db.insert(calc(Operation::Add, 2.0, 3.0)).unwrap();
        let b = db.insert(calc(Operation::Subtract, 9.0, 3.0)).unwrap();
        let c = db.insert(calc(Operation::Multiply, 2.0, 3.0)).unwrap();
        db.remove(b.uuid()).unwrap();
        let a = db.replace(a.uuid(), calc(Operation::Power, 2.0, 3.0)).unwrap().unwrap();

        let stats = db.compact().unwrap();
        assert_eq!(stats.live_records, 2);
        assert_eq!(stats.dropped_entries, 3);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(db.garbage(), 0);

        assert_eq!(db.find(None).unwrap(), vec![a.clone(), c.clone()]);

        // writes after compaction land in the swapped log
        let d = db.insert(calc(Operation::Add, 0.5, 0.5)).unwrap();
        drop(db);

        let db = open(&dir);
        assert_eq!(db.find(None).unwrap(), vec![a, c, d]);
        assert_eq!(db.find_by_id(b.uuid()).unwrap(), None);
    }

    #[test]
    fn compaction_reports_a_poisoned_bloom_filter() {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(open(&dir));
        let kept = db.insert(calc(Operation::Add, 2.0, 3.0)).unwrap();
        let dead = db.insert(calc(Operation::Add, 4.0, 5.0)).unwrap();
        db.remove(dead.uuid()).unwrap();

        let holder = db.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.bloom_filter.write().unwrap();
            panic!("poisoning the bloom filter");
        })
        .join();

        assert!(matches!(db.compact(), Err(StoreError::LockPoisoned("bloom filter"))));
        assert_eq!(db.garbage(), 2);
        assert_eq!(db.find(None).unwrap(), vec![kept]);
    }
}
