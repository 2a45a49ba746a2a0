#![forbid(unsafe_code)]
//! RAID bus opcode codec.
//!
//! Every bus exchange is one 64-bit word (MSB first):
//!
//! | bits  | field            | width |
//! |-------|------------------|-------|
//! | 63–56 | request_type     | 8     |
//! | 55–48 | number_of_blocks | 8     |
//! | 47–40 | disk_number      | 8     |
//! | 39–33 | reserved         | 7     |
//! | 32    | status           | 1     |
//! | 31–0  | block_id         | 32    |
//!
//! A response echoes the request fields with the status bit reporting
//! success (0) or failure (1). The codec is pure; transports live in
//! `raidline-bus`.

use raidline_error::{RaidlineError, Result};
use std::fmt;

const TYPE_SHIFT: u32 = 56;
const BLOCKS_SHIFT: u32 = 48;
const DISK_SHIFT: u32 = 40;
const RESERVED_SHIFT: u32 = 33;
const STATUS_SHIFT: u32 = 32;

const BYTE_MASK: u64 = 0xFF;
const RESERVED_MASK: u64 = 0x7F;
const BLOCK_ID_MASK: u64 = 0xFFFF_FFFF;

/// STATUS responses carry the disk's health in `block_id`; this value
/// marks a failed disk.
pub const DISK_FAILED: u32 = 2;
/// Health value of a disk that is operating normally.
pub const DISK_HEALTHY: u32 = 0;

/// Commands understood by the RAID array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    Init = 0,
    Format = 1,
    Read = 2,
    Write = 3,
    Close = 4,
    Status = 5,
}

impl RequestType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Format),
            2 => Some(Self::Read),
            3 => Some(Self::Write),
            4 => Some(Self::Close),
            5 => Some(Self::Status),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Format => "FORMAT",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Close => "CLOSE",
            Self::Status => "STATUS",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One request as the driver composes it. The status bit and reserved
/// field are always zero on the wire for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRequest {
    pub request_type: RequestType,
    pub blocks: u8,
    pub disk: u8,
    pub block_id: u32,
}

impl BusRequest {
    /// INIT carries the disk count in the disk_number field.
    #[must_use]
    pub fn init(disks: u8) -> Self {
        Self {
            request_type: RequestType::Init,
            blocks: 0,
            disk: disks,
            block_id: 0,
        }
    }

    #[must_use]
    pub fn format(disk: u8) -> Self {
        Self {
            request_type: RequestType::Format,
            blocks: 0,
            disk,
            block_id: 0,
        }
    }

    /// Single-block READ; the bus never batches.
    #[must_use]
    pub fn read(disk: u8, block: u32) -> Self {
        Self {
            request_type: RequestType::Read,
            blocks: 1,
            disk,
            block_id: block,
        }
    }

    /// Single-block WRITE; the bus never batches.
    #[must_use]
    pub fn write(disk: u8, block: u32) -> Self {
        Self {
            request_type: RequestType::Write,
            blocks: 1,
            disk,
            block_id: block,
        }
    }

    #[must_use]
    pub fn close() -> Self {
        Self {
            request_type: RequestType::Close,
            blocks: 0,
            disk: 0,
            block_id: 0,
        }
    }

    #[must_use]
    pub fn status(disk: u8) -> Self {
        Self {
            request_type: RequestType::Status,
            blocks: 0,
            disk,
            block_id: 0,
        }
    }
}

/// Decoded response word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusResponse {
    pub request_type: u8,
    pub blocks: u8,
    pub disk: u8,
    pub reserved: u8,
    pub status: bool,
    pub block_id: u32,
}

/// Pack a request into its wire word.
#[must_use]
pub fn encode(request: &BusRequest) -> u64 {
    (u64::from(request.request_type as u8) << TYPE_SHIFT)
        | (u64::from(request.blocks) << BLOCKS_SHIFT)
        | (u64::from(request.disk) << DISK_SHIFT)
        | u64::from(request.block_id)
}

/// Pack a response word echoing `request`, for server-side use.
#[must_use]
pub fn encode_response(request: &BusRequest, status: bool, block_id: u32) -> u64 {
    let mut word = (encode(request) & !BLOCK_ID_MASK) | u64::from(block_id);
    if status {
        word |= 1 << STATUS_SHIFT;
    }
    word
}

/// Unpack a wire word into its fields.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // fields are masked to width
pub fn decode(word: u64) -> BusResponse {
    BusResponse {
        request_type: ((word >> TYPE_SHIFT) & BYTE_MASK) as u8,
        blocks: ((word >> BLOCKS_SHIFT) & BYTE_MASK) as u8,
        disk: ((word >> DISK_SHIFT) & BYTE_MASK) as u8,
        reserved: ((word >> RESERVED_SHIFT) & RESERVED_MASK) as u8,
        status: (word >> STATUS_SHIFT) & 1 == 1,
        block_id: (word & BLOCK_ID_MASK) as u32,
    }
}

/// Validate that `response` matches `request` and reports success.
///
/// Every echoed field must match and the status bit must be clear.
/// STATUS is the one exception: its response block_id carries the
/// disk's health rather than an echo.
pub fn check_response(request: &BusRequest, response: &BusResponse) -> Result<()> {
    if response.request_type != request.request_type as u8 {
        return Err(mismatch(
            request,
            "request_type",
            u64::from(request.request_type as u8),
            u64::from(response.request_type),
        ));
    }
    if response.blocks != request.blocks {
        return Err(mismatch(
            request,
            "number_of_blocks",
            u64::from(request.blocks),
            u64::from(response.blocks),
        ));
    }
    if response.disk != request.disk {
        return Err(mismatch(
            request,
            "disk_number",
            u64::from(request.disk),
            u64::from(response.disk),
        ));
    }
    if request.request_type != RequestType::Status && response.block_id != request.block_id {
        return Err(mismatch(
            request,
            "block_id",
            u64::from(request.block_id),
            u64::from(response.block_id),
        ));
    }
    if response.status {
        return Err(RaidlineError::Protocol(format!(
            "{} rejected by array for disk {}",
            request.request_type, request.disk
        )));
    }
    Ok(())
}

fn mismatch(request: &BusRequest, field: &str, sent: u64, got: u64) -> RaidlineError {
    RaidlineError::Protocol(format!(
        "{} response mismatch on {field}: sent {sent}, got {got}",
        request.request_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_places_fields_at_wire_offsets() {
        let word = encode(&BusRequest::write(3, 7));
        assert_eq!(word, 0x0301_0300_0000_0007);

        let word = encode(&BusRequest::read(0xAB, 0xDEAD_BEEF));
        assert_eq!(word, 0x0201_AB00_DEAD_BEEF);

        let word = encode(&BusRequest::init(9));
        assert_eq!(word, 0x0000_0900_0000_0000);
    }

    #[test]
    fn decode_round_trips_encode() {
        let requests = [
            BusRequest::init(9),
            BusRequest::format(8),
            BusRequest::read(4, 4095),
            BusRequest::write(0, 0),
            BusRequest::close(),
            BusRequest::status(2),
        ];
        for request in requests {
            let response = decode(encode(&request));
            assert_eq!(response.request_type, request.request_type as u8);
            assert_eq!(response.blocks, request.blocks);
            assert_eq!(response.disk, request.disk);
            assert_eq!(response.reserved, 0);
            assert!(!response.status);
            assert_eq!(response.block_id, request.block_id);
        }
    }

    #[test]
    fn reserved_field_is_seven_bits() {
        // All seven reserved bits set, status clear.
        let word = 0x7F_u64 << 33;
        let response = decode(word);
        assert_eq!(response.reserved, 0x7F);
        assert!(!response.status);

        // Status bit set alone does not leak into reserved.
        let response = decode(1_u64 << 32);
        assert_eq!(response.reserved, 0);
        assert!(response.status);
    }

    #[test]
    fn encode_response_sets_status_and_block_id() {
        let request = BusRequest::status(3);
        let ok = decode(encode_response(&request, false, DISK_FAILED));
        assert_eq!(ok.disk, 3);
        assert!(!ok.status);
        assert_eq!(ok.block_id, DISK_FAILED);

        let rejected = decode(encode_response(&request, true, 0));
        assert!(rejected.status);
    }

    #[test]
    fn check_response_accepts_clean_echo() {
        let request = BusRequest::write(5, 123);
        let response = decode(encode(&request));
        assert!(check_response(&request, &response).is_ok());
    }

    #[test]
    fn check_response_rejects_field_mismatches() {
        let request = BusRequest::write(5, 123);

        let mut response = decode(encode(&request));
        response.disk = 6;
        assert!(check_response(&request, &response).is_err());

        let mut response = decode(encode(&request));
        response.blocks = 2;
        assert!(check_response(&request, &response).is_err());

        let mut response = decode(encode(&request));
        response.block_id = 124;
        assert!(check_response(&request, &response).is_err());

        let mut response = decode(encode(&request));
        response.request_type = RequestType::Read as u8;
        assert!(check_response(&request, &response).is_err());
    }

    #[test]
    fn check_response_rejects_status_bit() {
        let request = BusRequest::format(1);
        let response = decode(encode_response(&request, true, 0));
        let err = check_response(&request, &response).expect_err("status bit set");
        assert!(err.to_string().contains("FORMAT"));
    }

    #[test]
    fn status_health_is_not_treated_as_echo_mismatch() {
        let request = BusRequest::status(7);
        let response = decode(encode_response(&request, false, DISK_FAILED));
        assert!(check_response(&request, &response).is_ok());
        assert_eq!(response.block_id, DISK_FAILED);
    }
}
