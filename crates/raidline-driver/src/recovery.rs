//! Disk failure recovery.
//!
//! `disk_signal` polls every disk's STATUS, reformats the failed ones,
//! and repopulates each lost block from its surviving mirror, taking
//! the bytes from the cache when they are resident and from a bus READ
//! otherwise. Status is polled for the whole array before any disk is
//! formatted; within one disk, the format strictly precedes rebuild
//! writes.

use crate::{DiskState, TaglineDriver};
use raidline_bus::{BusPayload, RaidBus, exchange};
use raidline_error::{RaidlineError, Result};
use raidline_proto::{BusRequest, DISK_FAILED};
use raidline_types::{DiskId, PhysAddr};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Evidence line logged after a successful recovery pass.
#[derive(Debug, Default, Serialize)]
pub struct RecoveryReport {
    pub failed_disks: Vec<u8>,
    pub placements_rebuilt: usize,
    pub cache_hits: u64,
    pub bus_reads: u64,
}

impl<B: RaidBus> TaglineDriver<B> {
    /// React to a suspected disk failure.
    ///
    /// Fails fast on the first unrecoverable bus error; a disk that was
    /// mid-rebuild is left in whatever state the array last reported.
    pub fn disk_signal(&mut self) -> Result<()> {
        let mut report = RecoveryReport::default();

        for disk in 0..self.geometry.disks() {
            let response = exchange(
                self.cache.bus_mut(),
                &BusRequest::status(disk),
                BusPayload::None,
            )?;
            if response.block_id == DISK_FAILED {
                warn!(target: "raidline::recover", event = "disk_failed", disk);
                self.disk_states[disk as usize] = DiskState::Failed;
                report.failed_disks.push(disk);
            }
        }

        if report.failed_disks.is_empty() {
            debug!(target: "raidline::recover", event = "all_disks_healthy");
            return Ok(());
        }

        let failed = report.failed_disks.clone();
        for disk in failed {
            self.rebuild_disk(DiskId(disk), &mut report)
                .map_err(|err| {
                    RaidlineError::RecoveryFailed(format!("rebuild of disk {disk}: {err}"))
                })?;
        }

        if let Ok(evidence) = serde_json::to_string(&report) {
            info!(
                target: "raidline::recover",
                event = "recovery_complete",
                evidence = %evidence,
            );
        }
        Ok(())
    }

    fn rebuild_disk(&mut self, disk: DiskId, report: &mut RecoveryReport) -> Result<()> {
        self.disk_states[disk.0 as usize] = DiskState::Formatting;
        exchange(
            self.cache.bus_mut(),
            &BusRequest::format(disk.0),
            BusPayload::None,
        )?;
        self.disk_states[disk.0 as usize] = DiskState::Rebuilding;

        // Snapshot the affected placements; the walk borrows the
        // directory while the rebuild mutates the cache.
        let affected: Vec<(PhysAddr, PhysAddr)> = self
            .directory
            .placements()
            .filter_map(|(_, _, placement)| placement.split_on(disk))
            .collect();
        debug!(
            target: "raidline::recover",
            event = "rebuild_start",
            disk = disk.0,
            placements = affected.len(),
        );

        for (lost, alive) in affected {
            self.recover_block(lost, alive, report)?;
            report.placements_rebuilt += 1;
        }

        self.disk_states[disk.0 as usize] = DiskState::Healthy;
        info!(
            target: "raidline::recover",
            event = "rebuild_complete",
            disk = disk.0,
        );
        Ok(())
    }

    /// Restore `lost` from `alive`, preferring cached bytes over a bus
    /// READ of the surviving side.
    fn recover_block(
        &mut self,
        lost: PhysAddr,
        alive: PhysAddr,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        let bytes = if let Some(cached) = self.cache.get(alive) {
            report.cache_hits += 1;
            cached.to_vec()
        } else {
            let mut buf = vec![0_u8; self.geometry.block_size()];
            let request = BusRequest::read(alive.disk.0, alive.block.0);
            exchange(self.cache.bus_mut(), &request, BusPayload::Read(&mut buf))?;
            self.cache.put(alive, &buf)?;
            report.bus_reads += 1;
            buf
        };

        self.cache.put(lost, &bytes)?;
        if self.config.eager_rebuild_writes {
            let request = BusRequest::write(lost.disk.0, lost.block.0);
            exchange(self.cache.bus_mut(), &request, BusPayload::Write(&bytes))?;
        }
        Ok(())
    }
}
