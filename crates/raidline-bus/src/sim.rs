//! In-process RAID array.
//!
//! Implements the bus protocol against memory-backed disks so the
//! driver can be exercised without a remote array. The handle is
//! cloneable: tests keep one side for fault injection and inspection
//! while the driver owns the other.

use crate::{BusPayload, RaidBus, block_size_mismatch};
use parking_lot::Mutex;
use raidline_error::{RaidlineError, Result};
use raidline_proto::{BusRequest, RequestType, DISK_FAILED, DISK_HEALTHY};
use raidline_types::ArrayGeometry;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct SimDisk {
    blocks: Vec<u8>,
    failed: bool,
}

impl SimDisk {
    fn new(geometry: &ArrayGeometry) -> Self {
        Self {
            blocks: vec![0_u8; geometry.blocks_per_disk() as usize * geometry.block_size()],
            failed: false,
        }
    }
}

#[derive(Debug)]
struct SimState {
    geometry: ArrayGeometry,
    disks: Vec<SimDisk>,
    initialized: bool,
    closed: bool,
    forced_write_faults: u32,
    write_log: Vec<(u8, u32)>,
    read_log: Vec<(u8, u32)>,
}

/// Cloneable handle onto one simulated array.
#[derive(Clone, Debug)]
pub struct SimRaidBus {
    state: Arc<Mutex<SimState>>,
}

impl SimRaidBus {
    #[must_use]
    pub fn new(geometry: ArrayGeometry) -> Self {
        let disks = (0..geometry.disks())
            .map(|_| SimDisk::new(&geometry))
            .collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                geometry,
                disks,
                initialized: false,
                closed: false,
                forced_write_faults: 0,
                write_log: Vec::new(),
                read_log: Vec::new(),
            })),
        }
    }

    /// Mark a disk failed and drop its contents. STATUS reports the
    /// failed sentinel until the disk is formatted again.
    pub fn fail_disk(&self, disk: u8) {
        let mut state = self.state.lock();
        if let Some(d) = state.disks.get_mut(disk as usize) {
            d.failed = true;
            d.blocks.fill(0);
            warn!(target: "raidline::bus", event = "disk_failed", disk);
        }
    }

    /// Reject the next `count` WRITE requests with the status bit set.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().forced_write_faults = count;
    }

    /// Raw bytes currently on the array at `(disk, block)`.
    #[must_use]
    pub fn block_contents(&self, disk: u8, block: u32) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let size = state.geometry.block_size();
        let d = state.disks.get(disk as usize)?;
        if block >= state.geometry.blocks_per_disk() {
            return None;
        }
        let start = block as usize * size;
        Some(d.blocks[start..start + size].to_vec())
    }

    /// Every `(disk, block)` the array has been asked to WRITE, in order.
    #[must_use]
    pub fn write_log(&self) -> Vec<(u8, u32)> {
        self.state.lock().write_log.clone()
    }

    /// Every `(disk, block)` the array has been asked to READ, in order.
    #[must_use]
    pub fn read_log(&self) -> Vec<(u8, u32)> {
        self.state.lock().read_log.clone()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.write_log.clear();
        state.read_log.clear();
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl RaidBus for SimRaidBus {
    fn submit(&mut self, opcode: u64, mut payload: BusPayload<'_>) -> Result<u64> {
        let decoded = raidline_proto::decode(opcode);
        let Some(request_type) = RequestType::from_u8(decoded.request_type) else {
            return Err(RaidlineError::Protocol(format!(
                "unknown request type {}",
                decoded.request_type
            )));
        };
        let request = BusRequest {
            request_type,
            blocks: decoded.blocks,
            disk: decoded.disk,
            block_id: decoded.block_id,
        };

        let mut state = self.state.lock();
        let block_size = state.geometry.block_size();
        let reject = |req: &BusRequest| raidline_proto::encode_response(req, true, req.block_id);
        let accept = |req: &BusRequest| raidline_proto::encode_response(req, false, req.block_id);

        let word = match request_type {
            RequestType::Init => {
                state.initialized = true;
                debug!(target: "raidline::bus", event = "sim_init", disks = request.disk);
                accept(&request)
            }
            RequestType::Format => {
                let Some(disk) = state.disks.get_mut(request.disk as usize) else {
                    return Ok(reject(&request));
                };
                disk.blocks.fill(0);
                disk.failed = false;
                debug!(target: "raidline::bus", event = "sim_format", disk = request.disk);
                accept(&request)
            }
            RequestType::Read => {
                let BusPayload::Read(buf) = &mut payload else {
                    return Err(RaidlineError::Protocol(
                        "READ submitted without a destination buffer".to_owned(),
                    ));
                };
                if buf.len() != block_size {
                    return Err(block_size_mismatch(block_size, buf.len()));
                }
                if !state.geometry.contains(raidline_types::PhysAddr::new(
                    request.disk,
                    request.block_id,
                )) {
                    return Ok(reject(&request));
                }
                if state.disks[request.disk as usize].failed {
                    return Ok(reject(&request));
                }
                let start = request.block_id as usize * block_size;
                buf.copy_from_slice(
                    &state.disks[request.disk as usize].blocks[start..start + block_size],
                );
                state.read_log.push((request.disk, request.block_id));
                accept(&request)
            }
            RequestType::Write => {
                let BusPayload::Write(buf) = &payload else {
                    return Err(RaidlineError::Protocol(
                        "WRITE submitted without a payload".to_owned(),
                    ));
                };
                if buf.len() != block_size {
                    return Err(block_size_mismatch(block_size, buf.len()));
                }
                if state.forced_write_faults > 0 {
                    state.forced_write_faults -= 1;
                    return Ok(reject(&request));
                }
                if !state.geometry.contains(raidline_types::PhysAddr::new(
                    request.disk,
                    request.block_id,
                )) {
                    return Ok(reject(&request));
                }
                if state.disks[request.disk as usize].failed {
                    return Ok(reject(&request));
                }
                let start = request.block_id as usize * block_size;
                state.disks[request.disk as usize].blocks[start..start + block_size]
                    .copy_from_slice(buf);
                state.write_log.push((request.disk, request.block_id));
                accept(&request)
            }
            RequestType::Close => {
                state.closed = true;
                accept(&request)
            }
            RequestType::Status => {
                let Some(disk) = state.disks.get(request.disk as usize) else {
                    return Ok(reject(&request));
                };
                let health = if disk.failed { DISK_FAILED } else { DISK_HEALTHY };
                raidline_proto::encode_response(&request, false, health)
            }
        };
        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange;

    fn small_geometry() -> ArrayGeometry {
        ArrayGeometry::new(3, 4, 64).expect("geometry")
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut bus = SimRaidBus::new(small_geometry());
        exchange(&mut bus, &BusRequest::init(3), BusPayload::None).expect("init");

        let payload = vec![0x5A_u8; 64];
        exchange(
            &mut bus,
            &BusRequest::write(1, 2),
            BusPayload::Write(&payload),
        )
        .expect("write");

        let mut out = vec![0_u8; 64];
        exchange(&mut bus, &BusRequest::read(1, 2), BusPayload::Read(&mut out)).expect("read");
        assert_eq!(out, payload);
        assert_eq!(bus.write_log(), vec![(1, 2)]);
        assert_eq!(bus.read_log(), vec![(1, 2)]);
    }

    #[test]
    fn status_reports_failed_sentinel_until_format() {
        let mut bus = SimRaidBus::new(small_geometry());
        let handle = bus.clone();

        let response =
            exchange(&mut bus, &BusRequest::status(2), BusPayload::None).expect("status");
        assert_eq!(response.block_id, DISK_HEALTHY);

        handle.fail_disk(2);
        let response =
            exchange(&mut bus, &BusRequest::status(2), BusPayload::None).expect("status");
        assert_eq!(response.block_id, DISK_FAILED);

        exchange(&mut bus, &BusRequest::format(2), BusPayload::None).expect("format");
        let response =
            exchange(&mut bus, &BusRequest::status(2), BusPayload::None).expect("status");
        assert_eq!(response.block_id, DISK_HEALTHY);
    }

    #[test]
    fn failed_disk_rejects_io_and_loses_contents() {
        let mut bus = SimRaidBus::new(small_geometry());
        let handle = bus.clone();

        let payload = vec![0xC3_u8; 64];
        exchange(
            &mut bus,
            &BusRequest::write(0, 1),
            BusPayload::Write(&payload),
        )
        .expect("write");
        handle.fail_disk(0);

        let mut out = vec![0_u8; 64];
        let err = exchange(&mut bus, &BusRequest::read(0, 1), BusPayload::Read(&mut out))
            .expect_err("read from failed disk");
        assert!(matches!(err, RaidlineError::Protocol(_)));
        assert_eq!(handle.block_contents(0, 1), Some(vec![0_u8; 64]));
    }

    #[test]
    fn scripted_write_faults_reject_then_recover() {
        let mut bus = SimRaidBus::new(small_geometry());
        bus.fail_next_writes(1);

        let payload = vec![1_u8; 64];
        let err = exchange(
            &mut bus,
            &BusRequest::write(0, 0),
            BusPayload::Write(&payload),
        )
        .expect_err("forced fault");
        assert!(matches!(err, RaidlineError::Protocol(_)));

        exchange(
            &mut bus,
            &BusRequest::write(0, 0),
            BusPayload::Write(&payload),
        )
        .expect("write after fault drained");
    }

    #[test]
    fn out_of_range_requests_are_rejected() {
        let mut bus = SimRaidBus::new(small_geometry());
        let mut out = vec![0_u8; 64];
        assert!(
            exchange(&mut bus, &BusRequest::read(9, 0), BusPayload::Read(&mut out)).is_err()
        );
        assert!(exchange(&mut bus, &BusRequest::format(9), BusPayload::None).is_err());
        assert!(
            exchange(
                &mut bus,
                &BusRequest::write(0, 99),
                BusPayload::Write(&vec![0_u8; 64]),
            )
            .is_err()
        );
    }
}
