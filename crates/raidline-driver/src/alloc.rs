//! Physical block allocation.
//!
//! A single cursor walks the array disk-major: each allocation hands
//! out the cursor position, then advances one disk; wrapping the disk
//! index bumps the block row. Consecutive allocations therefore land
//! on different disks, which is what lets a primary and its mirror
//! come from back-to-back allocations.

use raidline_error::{RaidlineError, Result};
use raidline_types::{ArrayGeometry, PhysAddr, Placement};
use tracing::trace;

#[derive(Debug)]
pub(crate) struct AllocationCursor {
    geometry: ArrayGeometry,
    disk: u8,
    block: u32,
}

impl AllocationCursor {
    pub(crate) fn new(geometry: ArrayGeometry) -> Self {
        Self {
            geometry,
            disk: 0,
            block: 0,
        }
    }

    /// Slots not yet handed out.
    pub(crate) fn remaining(&self) -> u64 {
        let consumed =
            u64::from(self.block) * u64::from(self.geometry.disks()) + u64::from(self.disk);
        self.geometry.total_blocks().saturating_sub(consumed)
    }

    fn allocate(&mut self) -> Result<PhysAddr> {
        if self.block >= self.geometry.blocks_per_disk() {
            return Err(RaidlineError::CapacityExhausted);
        }
        let addr = PhysAddr::new(self.disk, self.block);
        self.disk += 1;
        if self.disk == self.geometry.disks() {
            self.disk = 0;
            self.block += 1;
        }
        trace!(target: "raidline::driver", event = "allocate", addr = %addr);
        Ok(addr)
    }

    /// Allocate a primary and its mirror on distinct disks.
    ///
    /// Refuses up front when fewer than two slots remain so a failed
    /// pairing never strands a half-allocated primary.
    pub(crate) fn allocate_pair(&mut self) -> Result<Placement> {
        if self.remaining() < 2 {
            return Err(RaidlineError::CapacityExhausted);
        }
        let primary = self.allocate()?;
        let mut mirror = self.allocate()?;
        // Disk-major advancement only revisits a disk after a full wrap,
        // so back-to-back allocations collide only on degenerate
        // geometries; re-advance until the mirror lands elsewhere.
        while mirror.disk == primary.disk {
            mirror = self.allocate()?;
        }
        Placement::new(primary, mirror)
            .map_err(|err| RaidlineError::InvalidArgument(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(disks: u8, blocks: u32) -> AllocationCursor {
        AllocationCursor::new(ArrayGeometry::new(disks, blocks, 64).expect("geometry"))
    }

    #[test]
    fn first_pair_lands_on_disk_zero_and_one() {
        let mut cursor = cursor(9, 4096);
        let placement = cursor.allocate_pair().expect("pair");
        assert_eq!(placement.primary, PhysAddr::new(0, 0));
        assert_eq!(placement.mirror, PhysAddr::new(1, 0));
    }

    #[test]
    fn cursor_wraps_disk_major() {
        let mut cursor = cursor(3, 4);
        let mut addrs = Vec::new();
        for _ in 0..6 {
            let placement = cursor.allocate_pair().expect("pair");
            addrs.push(placement.primary);
            addrs.push(placement.mirror);
        }
        let expected: Vec<PhysAddr> = (0..4_u32)
            .flat_map(|block| (0..3_u8).map(move |disk| PhysAddr::new(disk, block)))
            .collect();
        assert_eq!(addrs, expected);
    }

    #[test]
    fn every_pair_is_mirror_disjoint() {
        let mut cursor = cursor(3, 64);
        while cursor.remaining() >= 2 {
            let placement = cursor.allocate_pair().expect("pair");
            assert_ne!(placement.primary.disk, placement.mirror.disk);
        }
    }

    #[test]
    fn exhaustion_is_explicit_and_sticky() {
        let mut cursor = cursor(2, 2);
        assert_eq!(cursor.remaining(), 4);
        cursor.allocate_pair().expect("first pair");
        cursor.allocate_pair().expect("second pair");
        assert_eq!(cursor.remaining(), 0);
        assert!(matches!(
            cursor.allocate_pair(),
            Err(RaidlineError::CapacityExhausted)
        ));
        // Still exhausted on retry; the cursor does not move.
        assert!(matches!(
            cursor.allocate_pair(),
            Err(RaidlineError::CapacityExhausted)
        ));
    }

    #[test]
    fn single_trailing_slot_cannot_host_a_pair() {
        // 3 disks x 3 blocks = 9 slots; four pairs consume 8.
        let mut cursor = cursor(3, 3);
        for _ in 0..4 {
            cursor.allocate_pair().expect("pair");
        }
        assert_eq!(cursor.remaining(), 1);
        assert!(matches!(
            cursor.allocate_pair(),
            Err(RaidlineError::CapacityExhausted)
        ));
    }
}
