#![forbid(unsafe_code)]
//! Shared value types for the raidline driver.
//!
//! Physical addressing (`DiskId`, `BlockId`, `PhysAddr`), mirrored
//! placements, and the validated array geometry that every other crate
//! is parameterized by.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default disk count for a production array.
pub const DEFAULT_DISKS: u8 = 9;
/// Default number of blocks per disk.
pub const DEFAULT_BLOCKS_PER_DISK: u32 = 4096;
/// Default block size in bytes (fixed by the bus protocol).
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
/// Default cap on logical blocks per tagline.
pub const DEFAULT_MAX_TAGLINE_BLOCKS: u32 = 256;
/// Default cache capacity in entries (2x blocks-per-disk).
pub const DEFAULT_CACHE_CAPACITY: usize = 2 * DEFAULT_BLOCKS_PER_DISK as usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid geometry: {field} ({reason})")]
    InvalidGeometry {
        field: &'static str,
        reason: &'static str,
    },
    #[error("mirror placement shares disk {disk} with its primary")]
    MirrorOverlap { disk: u8 },
    #[error("physical address {addr} outside array bounds")]
    OutOfBounds { addr: PhysAddr },
}

/// Index of one disk in the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiskId(pub u8);

/// Index of one block within a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Identifier of one tagline (logical stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaglineId(pub u16);

/// One addressable block on the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysAddr {
    pub disk: DiskId,
    pub block: BlockId,
}

impl PhysAddr {
    #[must_use]
    pub fn new(disk: u8, block: u32) -> Self {
        Self {
            disk: DiskId(disk),
            block: BlockId(block),
        }
    }
}

/// Where one logical block lives: a primary copy and its mirror.
///
/// Invariant: the two sides are on distinct disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub primary: PhysAddr,
    pub mirror: PhysAddr,
}

impl Placement {
    /// Pair a primary with its mirror, rejecting same-disk placements.
    pub fn new(primary: PhysAddr, mirror: PhysAddr) -> Result<Self, LayoutError> {
        if primary.disk == mirror.disk {
            return Err(LayoutError::MirrorOverlap {
                disk: primary.disk.0,
            });
        }
        Ok(Self { primary, mirror })
    }

    /// Whether either side of this placement lives on `disk`.
    #[must_use]
    pub fn touches(&self, disk: DiskId) -> bool {
        self.primary.disk == disk || self.mirror.disk == disk
    }

    /// The side on `disk` and the surviving side, if this placement
    /// touches `disk` at all.
    #[must_use]
    pub fn split_on(&self, disk: DiskId) -> Option<(PhysAddr, PhysAddr)> {
        if self.primary.disk == disk {
            Some((self.primary, self.mirror))
        } else if self.mirror.disk == disk {
            Some((self.mirror, self.primary))
        } else {
            None
        }
    }
}

/// Validated shape of the RAID array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayGeometry {
    disks: u8,
    blocks_per_disk: u32,
    block_size: usize,
}

impl ArrayGeometry {
    /// Create a geometry if the shape can host mirrored placements.
    ///
    /// Mirroring needs at least two disks; zero-sized disks or blocks
    /// are rejected outright.
    pub fn new(disks: u8, blocks_per_disk: u32, block_size: usize) -> Result<Self, LayoutError> {
        if disks < 2 {
            return Err(LayoutError::InvalidGeometry {
                field: "disks",
                reason: "mirroring requires at least two disks",
            });
        }
        if blocks_per_disk == 0 {
            return Err(LayoutError::InvalidGeometry {
                field: "blocks_per_disk",
                reason: "must be non-zero",
            });
        }
        if block_size == 0 {
            return Err(LayoutError::InvalidGeometry {
                field: "block_size",
                reason: "must be non-zero",
            });
        }
        Ok(Self {
            disks,
            blocks_per_disk,
            block_size,
        })
    }

    #[must_use]
    pub fn disks(&self) -> u8 {
        self.disks
    }

    #[must_use]
    pub fn blocks_per_disk(&self) -> u32 {
        self.blocks_per_disk
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total addressable blocks across the whole array.
    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        u64::from(self.disks) * u64::from(self.blocks_per_disk)
    }

    #[must_use]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr.disk.0 < self.disks && addr.block.0 < self.blocks_per_disk
    }

    /// Bounds-check an address against this geometry.
    pub fn check(&self, addr: PhysAddr) -> Result<(), LayoutError> {
        if self.contains(addr) {
            Ok(())
        } else {
            Err(LayoutError::OutOfBounds { addr })
        }
    }
}

impl Default for ArrayGeometry {
    fn default() -> Self {
        Self {
            disks: DEFAULT_DISKS,
            blocks_per_disk: DEFAULT_BLOCKS_PER_DISK,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaglineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.disk, self.block)
    }
}
