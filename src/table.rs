//! Fixed-size bucket table with online migration support.
//!
//! A [`Table`] is a power-of-two array of buckets. Each bucket holds a
//! small ordered set of (fingerprint, value) slots behind its own lock;
//! slot order is insertion order, and the full-bucket eviction candidate
//! is always the least recently inserted slot.
//!
//! During a migration the table carries an auxiliary table. A bucket that
//! has been moved is marked `migrated`; writers that land on a migrated
//! bucket re-target the auxiliary, while readers probe primary then
//! auxiliary. Lock order is always primary bucket before auxiliary
//! bucket, never the reverse.
//!
//! Transactional buckets additionally record the term they last observed
//! and a banish list of fingerprints rejected for the current term.

use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;
use std::ops::Range;
use std::sync::Arc;

use crate::config::{CacheKind, MAX_LOG_SIZE, MAX_SLOTS_PER_BUCKET, MIN_LOG_SIZE};
use crate::sync::{AtomicBool, Ordering, lock_with_tries};
use crate::value::CachedValue;

/// Banished fingerprints tracked per transactional bucket. Once the list
/// is full the whole bucket rejects inserts for the rest of the term.
const BANISH_LIST_CAPACITY: usize = 3;

/// One (fingerprint, value) entry within a bucket.
pub(crate) struct Slot {
    pub(crate) fingerprint: u32,
    pub(crate) value: Arc<CachedValue>,
}

/// Bucket contents, guarded by the bucket lock.
pub(crate) struct BucketData {
    /// Set once the bucket's slots have been moved to the auxiliary.
    pub(crate) migrated: bool,
    /// All inserts rejected for the rest of the term (banish overflow).
    fully_banished: bool,
    /// Term this bucket last observed; stale banish state is cleared
    /// when a newer term is presented at lock time.
    term: u64,
    banished: SmallVec<[u32; BANISH_LIST_CAPACITY]>,
    slots: SmallVec<[Slot; 5]>,
}

impl BucketData {
    fn new() -> Self {
        Self {
            migrated: false,
            fully_banished: false,
            term: 0,
            banished: SmallVec::new(),
            slots: SmallVec::new(),
        }
    }

    /// Clear banish state left over from an older term.
    pub(crate) fn refresh_term(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.banished.clear();
            self.fully_banished = false;
        }
    }

    pub(crate) fn find(&self, fingerprint: u32, key: &[u8]) -> Option<Arc<CachedValue>> {
        self.slots
            .iter()
            .find(|slot| slot.fingerprint == fingerprint && slot.value.same_key(key))
            .map(|slot| Arc::clone(&slot.value))
    }

    /// Position of the slot matching fingerprint and key, if any.
    pub(crate) fn position(&self, fingerprint: u32, key: &[u8]) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.fingerprint == fingerprint && slot.value.same_key(key))
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Slot {
        self.slots.remove(index)
    }

    /// Replace the value at `index` in place, keeping the slot's age.
    pub(crate) fn replace_at(&mut self, index: usize, value: Arc<CachedValue>) -> Arc<CachedValue> {
        std::mem::replace(&mut self.slots[index].value, value)
    }

    /// Size in bytes of the value at `index`.
    pub(crate) fn replace_peek_size(&self, index: usize) -> u64 {
        self.slots[index].value.size()
    }

    /// Size in bytes of the eviction candidate, if the bucket is
    /// non-empty.
    pub(crate) fn oldest_size(&self) -> Option<u64> {
        self.slots.first().map(|slot| slot.value.size())
    }

    /// Remove and return the least recently inserted slot.
    pub(crate) fn evict_oldest(&mut self) -> Option<Slot> {
        if self.slots.is_empty() {
            None
        } else {
            Some(self.slots.remove(0))
        }
    }

    pub(crate) fn push(&mut self, fingerprint: u32, value: Arc<CachedValue>) {
        self.slots.push(Slot { fingerprint, value });
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_banished(&self, fingerprint: u32) -> bool {
        self.fully_banished || self.banished.contains(&fingerprint)
    }

    /// Add a fingerprint to the banish list. On overflow the bucket
    /// becomes fully banished until the term advances.
    pub(crate) fn banish_fingerprint(&mut self, fingerprint: u32) {
        if self.fully_banished || self.banished.contains(&fingerprint) {
            return;
        }
        if self.banished.len() < BANISH_LIST_CAPACITY {
            self.banished.push(fingerprint);
        } else {
            self.fully_banished = true;
        }
    }

    fn mark_fully_banished(&mut self) {
        self.fully_banished = true;
    }

    fn drain_for_clear(&mut self) -> u64 {
        let mut reclaimed = 0;
        for slot in self.slots.drain(..) {
            reclaimed += slot.value.size();
        }
        self.banished.clear();
        self.fully_banished = false;
        self.migrated = false;
        reclaimed
    }
}

/// A bucket: contents behind a dedicated lock.
pub(crate) struct Bucket {
    data: Mutex<BucketData>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            data: Mutex::new(BucketData::new()),
        }
    }
}

/// Power-of-two bucket array, optionally carrying an auxiliary table
/// while a migration is in flight.
pub struct Table {
    log_size: u32,
    kind: CacheKind,
    slots_per_bucket: usize,
    buckets: Box<[Bucket]>,
    auxiliary: RwLock<Option<Arc<Table>>>,
    evictions_signaled: AtomicBool,
    /// Tables are created disabled, enabled when assigned to a cache,
    /// and disabled again by [`Table::clear`]. Operations that lock a
    /// bucket of a disabled table must back off and re-read the cache's
    /// table pointer; the contents are gone.
    enabled: AtomicBool,
}

impl Table {
    /// Create a table with `2^log_size` buckets. The table starts
    /// disabled.
    pub fn new(log_size: u32, kind: CacheKind, slots_per_bucket: usize) -> Self {
        assert!((MIN_LOG_SIZE..=MAX_LOG_SIZE).contains(&log_size));
        assert!((1..=MAX_SLOTS_PER_BUCKET).contains(&slots_per_bucket));
        let buckets = (0..1usize << log_size)
            .map(|_| Bucket::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            log_size,
            kind,
            slots_per_bucket,
            buckets,
            auxiliary: RwLock::new(None),
            evictions_signaled: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }
    }

    /// Mark the table live. Called when the table is assigned to a
    /// cache, as the primary or as the migration target.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Whether the table is live. A bucket read from a disabled table
    /// must be discarded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Table size exponent.
    pub fn log_size(&self) -> u32 {
        self.log_size
    }

    /// Number of buckets (`2^log_size`).
    pub fn size(&self) -> u64 {
        1u64 << self.log_size
    }

    /// The cache variant this table serves.
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Slots per bucket.
    pub fn slots_per_bucket(&self) -> usize {
        self.slots_per_bucket
    }

    /// Bucket index for a fingerprint: its top `log_size` bits.
    #[inline]
    pub fn bucket_index(&self, fingerprint: u32) -> usize {
        ((fingerprint as u64) >> (32 - self.log_size)) as usize
    }

    /// Approximate memory footprint of the table in bytes.
    pub fn memory_usage(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.buckets.len() * std::mem::size_of::<Bucket>()) as u64
    }

    /// Snapshot of the auxiliary table pointer.
    pub fn auxiliary(&self) -> Option<Arc<Table>> {
        self.auxiliary.read().clone()
    }

    /// Swap the auxiliary table pointer, returning the previous value.
    pub fn set_auxiliary(&self, new: Option<Arc<Table>>) -> Option<Arc<Table>> {
        std::mem::replace(&mut *self.auxiliary.write(), new)
    }

    /// Record that eviction pressure was observed on this table.
    pub fn signal_evictions(&self) {
        self.evictions_signaled.store(true, Ordering::Relaxed);
    }

    /// Whether eviction pressure was signaled since creation or clear.
    pub fn evictions_signaled(&self) -> bool {
        self.evictions_signaled.load(Ordering::Relaxed)
    }

    pub(crate) fn lock_bucket(&self, index: usize, tries: u64) -> Option<MutexGuard<'_, BucketData>> {
        lock_with_tries(&self.buckets[index].data, tries)
    }

    pub(crate) fn lock_bucket_blocking(&self, index: usize) -> MutexGuard<'_, BucketData> {
        self.buckets[index].data.lock()
    }

    /// The auxiliary bucket indices a primary bucket maps to.
    ///
    /// Growing, one primary bucket fans out to `2^(new-old)` auxiliary
    /// buckets; shrinking, several primaries fold into one.
    pub(crate) fn auxiliary_index_range(&self, index: usize, auxiliary: &Table) -> Range<usize> {
        if auxiliary.log_size >= self.log_size {
            let shift = auxiliary.log_size - self.log_size;
            (index << shift)..((index + 1) << shift)
        } else {
            let shift = self.log_size - auxiliary.log_size;
            (index >> shift)..((index >> shift) + 1)
        }
    }

    /// Move one primary bucket's contents into `new_table`.
    ///
    /// Idempotent per index: a bucket already marked migrated is left
    /// alone. Target buckets that are full evict their oldest slot to
    /// make room; the byte total of those evictions is returned so the
    /// caller can release the usage. `term` is the current term for
    /// transactional tables (0 for plain).
    pub(crate) fn migrate_bucket(&self, index: usize, new_table: &Table, term: u64) -> u64 {
        let mut primary = self.lock_bucket_blocking(index);
        if primary.migrated {
            return 0;
        }
        primary.refresh_term(term);

        let mut reclaimed = 0;
        while let Some(slot) = primary.evict_oldest() {
            let target_index = new_table.bucket_index(slot.fingerprint);
            let mut target = new_table.lock_bucket_blocking(target_index);
            target.refresh_term(term);
            if target.len() >= new_table.slots_per_bucket {
                if let Some(evicted) = target.evict_oldest() {
                    reclaimed += evicted.value.size();
                }
            }
            target.push(slot.fingerprint, slot.value);
        }

        // carry banish state into the buckets now authoritative for it
        for fingerprint in std::mem::take(&mut primary.banished) {
            let target_index = new_table.bucket_index(fingerprint);
            let mut target = new_table.lock_bucket_blocking(target_index);
            target.refresh_term(term);
            target.banish_fingerprint(fingerprint);
        }
        if primary.fully_banished {
            for target_index in self.auxiliary_index_range(index, new_table) {
                let mut target = new_table.lock_bucket_blocking(target_index);
                target.refresh_term(term);
                target.mark_fully_banished();
            }
            primary.fully_banished = false;
        }

        primary.migrated = true;
        reclaimed
    }

    /// Disable the table and drain every bucket, dropping the held
    /// values. Returns the byte total of the dropped values so the
    /// caller can release the usage.
    ///
    /// The disable happens before any bucket is touched: a reader that
    /// locks a bucket and still observes the table enabled is looking
    /// at intact contents.
    pub fn clear(&self) -> u64 {
        self.enabled.store(false, Ordering::Release);
        let mut reclaimed = 0;
        for bucket in self.buckets.iter() {
            reclaimed += bucket.data.lock().drain_for_clear();
        }
        self.evictions_signaled.store(false, Ordering::Relaxed);
        reclaimed
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("log_size", &self.log_size)
            .field("kind", &self.kind)
            .field("slots_per_bucket", &self.slots_per_bucket)
            .finish()
    }
}
