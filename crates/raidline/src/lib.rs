#![forbid(unsafe_code)]
//! Raidline public API facade.
//!
//! Re-exports the driver surface and its collaborators through one
//! crate so downstream consumers (the CLI, embedders) depend on a
//! single stable interface.

pub use raidline_bus::{BusPayload, RaidBus, SimRaidBus, TcpRaidBus, exchange};
pub use raidline_cache::{CacheStats, WriteBackCache};
pub use raidline_driver::{DiskState, DriverConfig, RecoveryReport, TaglineDriver};
pub use raidline_error::{RaidlineError, Result};
pub use raidline_proto::{BusRequest, BusResponse, RequestType};
pub use raidline_types::{
    ArrayGeometry, BlockId, DiskId, PhysAddr, Placement, TaglineId,
};
