#![forbid(unsafe_code)]
//! Write-back LRU cache keyed by physical address.
//!
//! Every driver read and write goes through here. Entries live in a
//! slot arena; recency is an intrusive doubly-linked list of slot
//! indices with a `HashMap` from `(disk, block)` to slot, so no entry
//! is ever aliased by raw pointers. The cache owns the bus: evicting
//! the least-recently-used entry writes its buffer through to the
//! array before the slot is reused.

use raidline_bus::{BusPayload, RaidBus, exchange};
use raidline_error::{RaidlineError, Result};
use raidline_proto::BusRequest;
use raidline_types::PhysAddr;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Aggregate counters reported when the cache is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries inserted (first `put` for a key, including read-miss fills).
    pub inserts: u64,
    /// `get` calls, hit or miss.
    pub gets: u64,
    /// `get` hits plus overwriting `put`s.
    pub hits: u64,
    /// `get` misses plus inserting `put`s.
    pub misses: u64,
    /// Entries written through to the array and freed.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio in `[0.0, 1.0]`; zero before any traffic.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot {
    addr: PhysAddr,
    buf: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Write-back LRU cache in front of a `RaidBus`.
#[derive(Debug)]
pub struct WriteBackCache<B: RaidBus> {
    bus: B,
    capacity: usize,
    block_size: usize,
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<PhysAddr, usize>,
    /// Most recently used slot.
    head: Option<usize>,
    /// Least recently used slot; evicted first.
    tail: Option<usize>,
    stats: CacheStats,
}

impl<B: RaidBus> WriteBackCache<B> {
    pub fn new(bus: B, capacity: usize, block_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RaidlineError::InvalidArgument(
                "cache capacity must be non-zero".to_owned(),
            ));
        }
        if block_size == 0 {
            return Err(RaidlineError::InvalidArgument(
                "cache block size must be non-zero".to_owned(),
            ));
        }
        debug!(
            target: "raidline::cache",
            event = "init",
            capacity,
            block_size,
        );
        Ok(Self {
            bus,
            capacity,
            block_size,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            stats: CacheStats::default(),
        })
    }

    /// Direct access to the bus for opcode-only driver traffic.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        self.index.contains_key(&addr)
    }

    /// Look up a block. A hit promotes the entry to most recently used;
    /// a miss leaves the cache untouched and the fill to the caller.
    pub fn get(&mut self, addr: PhysAddr) -> Option<&[u8]> {
        self.stats.gets += 1;
        match self.index.get(&addr).copied() {
            Some(slot) => {
                self.stats.hits += 1;
                self.promote(slot);
                trace!(target: "raidline::cache", event = "hit", addr = %addr);
                Some(&self.slots[slot].buf)
            }
            None => {
                self.stats.misses += 1;
                trace!(target: "raidline::cache", event = "miss", addr = %addr);
                None
            }
        }
    }

    /// Install `data` as the authoritative bytes for `addr`.
    ///
    /// An existing entry is overwritten in place and promoted. A new
    /// entry may displace the least-recently-used one, which is written
    /// through to the array first; if that write fails the victim stays
    /// resident, nothing is inserted, and the error is returned.
    pub fn put(&mut self, addr: PhysAddr, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(RaidlineError::InvalidArgument(format!(
                "cache put of {} bytes, block size is {}",
                data.len(),
                self.block_size
            )));
        }

        if let Some(slot) = self.index.get(&addr).copied() {
            self.slots[slot].buf.copy_from_slice(data);
            self.promote(slot);
            self.stats.hits += 1;
            trace!(target: "raidline::cache", event = "update", addr = %addr);
            return Ok(());
        }

        if self.index.len() == self.capacity {
            self.evict_lru()?;
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot].addr = addr;
                self.slots[slot].buf.copy_from_slice(data);
                slot
            }
            None => {
                self.slots.push(Slot {
                    addr,
                    buf: data.to_vec(),
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        };
        self.push_front(slot);
        self.index.insert(addr, slot);
        self.stats.inserts += 1;
        self.stats.misses += 1;
        trace!(target: "raidline::cache", event = "insert", addr = %addr);
        Ok(())
    }

    /// Write every resident entry through to the array, oldest first.
    /// Entries stay resident; only the on-array copies are refreshed.
    pub fn flush(&mut self) -> Result<()> {
        let mut cursor = self.tail;
        let mut flushed = 0_usize;
        while let Some(slot) = cursor {
            let addr = self.slots[slot].addr;
            let request = BusRequest::write(addr.disk.0, addr.block.0);
            exchange(
                &mut self.bus,
                &request,
                BusPayload::Write(&self.slots[slot].buf),
            )?;
            flushed += 1;
            cursor = self.slots[slot].prev;
        }
        debug!(target: "raidline::cache", event = "flush", entries = flushed);
        Ok(())
    }

    /// Flush, tear down all entries, and report the final counters.
    pub fn close(&mut self) -> Result<CacheStats> {
        self.flush()?;
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        let stats = self.stats;
        info!(
            target: "raidline::cache",
            event = "closed",
            inserts = stats.inserts,
            gets = stats.gets,
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            hit_ratio = stats.hit_ratio(),
        );
        Ok(stats)
    }

    fn evict_lru(&mut self) -> Result<()> {
        let victim = self.tail.ok_or_else(|| {
            RaidlineError::CacheInternal("eviction requested on an empty cache".to_owned())
        })?;
        let addr = self.slots[victim].addr;
        let request = BusRequest::write(addr.disk.0, addr.block.0);
        // Write through before touching the recency list; on failure the
        // victim must remain resident with its dirty bytes intact.
        exchange(
            &mut self.bus,
            &request,
            BusPayload::Write(&self.slots[victim].buf),
        )?;

        self.detach(victim);
        self.index.remove(&addr);
        self.free.push(victim);
        self.stats.evictions += 1;
        trace!(target: "raidline::cache", event = "evict", addr = %addr);
        Ok(())
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.detach(slot);
        self.push_front(slot);
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        if let Some(old) = self.head {
            self.slots[old].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Recency order from most to least recently used.
    #[must_use]
    pub fn recency_order(&self) -> Vec<PhysAddr> {
        let mut order = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            order.push(self.slots[slot].addr);
            cursor = self.slots[slot].next;
        }
        order
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        // Index and recency list must describe the same entry set, and
        // the list must be coherent in both directions.
        let order = self.recency_order();
        assert_eq!(order.len(), self.index.len());
        assert!(self.index.len() <= self.capacity);
        for addr in &order {
            assert!(self.index.contains_key(addr));
        }
        let mut reverse = Vec::with_capacity(self.index.len());
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            reverse.push(self.slots[slot].addr);
            cursor = self.slots[slot].prev;
        }
        reverse.reverse();
        assert_eq!(order, reverse);
    }
}
