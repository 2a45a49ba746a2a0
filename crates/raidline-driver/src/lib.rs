#![forbid(unsafe_code)]
//! The tagline driver.
//!
//! Presents numbered append-and-overwrite streams of fixed-size blocks
//! ("taglines") on top of an opcode-based RAID bus. Every logical block
//! is mirrored onto two distinct disks, all traffic flows through a
//! write-back LRU cache, and a failed disk can be rebuilt from its
//! surviving mirrors (`disk_signal`).
//!
//! The driver is single-threaded: one handle, no interior locking, and
//! every bus exchange completes before the next one starts.

use raidline_bus::{BusPayload, RaidBus, exchange};
use raidline_cache::{CacheStats, WriteBackCache};
use raidline_error::{RaidlineError, Result};
use raidline_proto::BusRequest;
use raidline_types::{
    ArrayGeometry, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_TAGLINE_BLOCKS, TaglineId,
};
use std::cmp::Ordering;
use tracing::{debug, info};

mod alloc;
mod recovery;
mod tagmap;

use alloc::AllocationCursor;
use tagmap::TaglineDirectory;

pub use recovery::RecoveryReport;

/// Tunables that are fixed for the lifetime of one driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Maximum resident cache entries.
    pub cache_capacity: usize,
    /// Cap on logical blocks per tagline.
    pub max_blocks_per_tagline: u32,
    /// Write a rebuilt block straight through to the array instead of
    /// relying on a later eviction to restore the on-disk copy.
    pub eager_rebuild_writes: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_blocks_per_tagline: DEFAULT_MAX_TAGLINE_BLOCKS,
            eager_rebuild_writes: true,
        }
    }
}

/// Per-disk health as observed through STATUS polls and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Healthy,
    Failed,
    Formatting,
    Rebuilding,
}

/// One driver instance owning the cache, the tagline directory, and
/// the allocation cursor, with exclusive use of the bus underneath.
#[derive(Debug)]
pub struct TaglineDriver<B: RaidBus> {
    geometry: ArrayGeometry,
    config: DriverConfig,
    cache: WriteBackCache<B>,
    directory: TaglineDirectory,
    cursor: AllocationCursor,
    disk_states: Vec<DiskState>,
}

impl<B: RaidBus> TaglineDriver<B> {
    /// Bring up the driver: bus INIT, a FORMAT per disk, then the
    /// cache and the (empty) tagline directory.
    pub fn init(
        bus: B,
        geometry: ArrayGeometry,
        maxlines: u32,
        config: DriverConfig,
    ) -> Result<Self> {
        let directory = TaglineDirectory::new(maxlines, config.max_blocks_per_tagline)?;
        let mut cache = WriteBackCache::new(bus, config.cache_capacity, geometry.block_size())?;

        exchange(
            cache.bus_mut(),
            &BusRequest::init(geometry.disks()),
            BusPayload::None,
        )?;
        for disk in 0..geometry.disks() {
            exchange(cache.bus_mut(), &BusRequest::format(disk), BusPayload::None)?;
        }

        info!(
            target: "raidline::driver",
            event = "init",
            maxlines,
            disks = geometry.disks(),
            blocks_per_disk = geometry.blocks_per_disk(),
            cache_capacity = config.cache_capacity,
        );
        Ok(Self {
            geometry,
            config,
            cache,
            directory,
            cursor: AllocationCursor::new(geometry),
            disk_states: vec![DiskState::Healthy; geometry.disks() as usize],
        })
    }

    #[must_use]
    pub fn geometry(&self) -> ArrayGeometry {
        self.geometry
    }

    #[must_use]
    pub fn maxlines(&self) -> u32 {
        self.directory.maxlines()
    }

    /// Cache counters so far; the final numbers are logged by `close`.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Health of each disk as last observed via STATUS and recovery.
    #[must_use]
    pub fn disk_states(&self) -> &[DiskState] {
        &self.disk_states
    }

    /// Write `nblocks` consecutive logical blocks starting at `bnum`.
    ///
    /// A write at the tagline's high-water mark appends (allocating a
    /// fresh mirrored placement); below it overwrites in place; above
    /// it would create a hole and is rejected. `buf` must be exactly
    /// `nblocks` blocks long.
    pub fn write(&mut self, tag: TaglineId, bnum: u32, nblocks: u8, buf: &[u8]) -> Result<()> {
        self.check_span(bnum, nblocks, buf.len())?;
        for (i, chunk) in buf.chunks_exact(self.geometry.block_size()).enumerate() {
            self.write_block(tag, bnum + i as u32, chunk)?;
        }
        debug!(
            target: "raidline::driver",
            event = "write",
            tag = %tag,
            bnum,
            nblocks,
        );
        Ok(())
    }

    /// Read `nblocks` consecutive logical blocks starting at `bnum`
    /// into `buf` (exactly `nblocks` blocks long).
    pub fn read(&mut self, tag: TaglineId, bnum: u32, nblocks: u8, buf: &mut [u8]) -> Result<()> {
        self.check_span(bnum, nblocks, buf.len())?;
        let block_size = self.geometry.block_size();
        for (i, chunk) in buf.chunks_exact_mut(block_size).enumerate() {
            self.read_block(tag, bnum + i as u32, chunk)?;
        }
        debug!(
            target: "raidline::driver",
            event = "read",
            tag = %tag,
            bnum,
            nblocks,
        );
        Ok(())
    }

    /// Flush and tear down the cache (logging its counters), close the
    /// bus, and consume the driver.
    pub fn close(mut self) -> Result<CacheStats> {
        let stats = self.cache.close()?;
        exchange(self.cache.bus_mut(), &BusRequest::close(), BusPayload::None)?;
        info!(target: "raidline::driver", event = "closed");
        Ok(stats)
    }

    fn check_span(&self, bnum: u32, nblocks: u8, buf_len: usize) -> Result<()> {
        if nblocks == 0 {
            return Err(RaidlineError::InvalidArgument(
                "block count must be non-zero".to_owned(),
            ));
        }
        let expected = nblocks as usize * self.geometry.block_size();
        if buf_len != expected {
            return Err(RaidlineError::InvalidArgument(format!(
                "buffer is {buf_len} bytes, {nblocks} blocks need {expected}"
            )));
        }
        if bnum.checked_add(u32::from(nblocks)).is_none() {
            return Err(RaidlineError::InvalidArgument(format!(
                "block span {bnum}+{nblocks} overflows"
            )));
        }
        Ok(())
    }

    fn write_block(&mut self, tag: TaglineId, bnum: u32, data: &[u8]) -> Result<()> {
        let next = self.directory.next_index(tag)?;
        match bnum.cmp(&next) {
            Ordering::Greater => Err(RaidlineError::InvalidArgument(format!(
                "write at block {bnum} of tagline {tag} would leave a hole (high-water mark {next})"
            ))),
            Ordering::Equal => {
                // Check the tagline's limit before consuming allocator
                // slots; a rejected append must not strand a placement.
                self.directory.can_append(tag)?;
                let placement = self.cursor.allocate_pair()?;
                self.directory.append(tag, placement)?;
                self.cache.put(placement.primary, data)?;
                self.cache.put(placement.mirror, data)?;
                debug!(
                    target: "raidline::driver",
                    event = "append",
                    tag = %tag,
                    bnum,
                    primary = %placement.primary,
                    mirror = %placement.mirror,
                );
                Ok(())
            }
            Ordering::Less => {
                let placement = self.directory.placement(tag, bnum)?;
                self.cache.put(placement.primary, data)?;
                self.cache.put(placement.mirror, data)?;
                Ok(())
            }
        }
    }

    fn read_block(&mut self, tag: TaglineId, bnum: u32, out: &mut [u8]) -> Result<()> {
        let placement = self.directory.placement(tag, bnum)?;
        let primary = placement.primary;

        // Mirrors are never consulted while their disk is healthy; the
        // primary copy is authoritative on the read path.
        if let Some(cached) = self.cache.get(primary) {
            out.copy_from_slice(cached);
            return Ok(());
        }

        let request = BusRequest::read(primary.disk.0, primary.block.0);
        exchange(self.cache.bus_mut(), &request, BusPayload::Read(&mut *out))?;
        self.cache.put(primary, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raidline_bus::SimRaidBus;

    fn small_geometry() -> ArrayGeometry {
        ArrayGeometry::new(3, 16, 64).expect("geometry")
    }

    fn driver() -> (TaglineDriver<SimRaidBus>, SimRaidBus) {
        let bus = SimRaidBus::new(small_geometry());
        let handle = bus.clone();
        let config = DriverConfig {
            cache_capacity: 8,
            max_blocks_per_tagline: 16,
            ..DriverConfig::default()
        };
        let driver = TaglineDriver::init(bus, small_geometry(), 2, config).expect("init");
        (driver, handle)
    }

    #[test]
    fn init_brings_up_the_bus() {
        let (driver, handle) = driver();
        assert!(handle.is_initialized());
        assert_eq!(driver.maxlines(), 2);
    }

    #[test]
    fn init_rejects_zero_maxlines() {
        let bus = SimRaidBus::new(small_geometry());
        let err = TaglineDriver::init(bus, small_geometry(), 0, DriverConfig::default())
            .expect_err("zero maxlines");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));
    }

    #[test]
    fn span_validation_rejects_bad_buffers() {
        let (mut driver, _handle) = driver();
        let mut out = vec![0_u8; 64];

        let err = driver
            .write(TaglineId(0), 0, 0, &[])
            .expect_err("zero blocks");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));

        let err = driver
            .write(TaglineId(0), 0, 2, &vec![0_u8; 64])
            .expect_err("short buffer");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));

        let err = driver
            .read(TaglineId(0), u32::MAX, 2, &mut vec![0_u8; 128])
            .expect_err("span overflow");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));

        let err = driver
            .read(TaglineId(9), 0, 1, &mut out)
            .expect_err("unknown tagline");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));
    }

    #[test]
    fn multi_block_write_splits_into_single_block_appends() {
        let (mut driver, _handle) = driver();
        let tag = TaglineId(0);
        let mut buf = vec![0_u8; 3 * 64];
        for (i, chunk) in buf.chunks_exact_mut(64).enumerate() {
            chunk.fill(i as u8 + 1);
        }
        driver.write(tag, 0, 3, &buf).expect("write three blocks");

        let mut out = vec![0_u8; 3 * 64];
        driver.read(tag, 0, 3, &mut out).expect("read three blocks");
        assert_eq!(out, buf);

        // A middle block can be read on its own.
        let mut one = vec![0_u8; 64];
        driver.read(tag, 1, 1, &mut one).expect("read middle");
        assert_eq!(one, vec![2_u8; 64]);
    }
}
