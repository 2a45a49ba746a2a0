#![forbid(unsafe_code)]
//! Bus transports for the raidline driver.
//!
//! The array speaks an opcode-based request/response protocol: one
//! 64-bit word per exchange, plus a single block payload for READ and
//! WRITE. `RaidBus` is the seam the driver and cache are written
//! against; `TcpRaidBus` talks to a remote array and `SimRaidBus` is an
//! in-process array used by tests, benches, and local runs.

use raidline_error::{RaidlineError, Result};
use raidline_proto::{BusRequest, BusResponse};
use tracing::trace;

mod sim;
mod tcp;

pub use sim::SimRaidBus;
pub use tcp::TcpRaidBus;

/// Block payload accompanying one opcode exchange.
///
/// WRITE carries the block out; READ borrows a buffer the transport
/// fills; everything else is opcode-only.
#[derive(Debug)]
pub enum BusPayload<'a> {
    None,
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

/// Synchronous request/response channel to the RAID array.
///
/// One call is one complete exchange: the request word (and payload,
/// for WRITE) goes out, and the call blocks until the response word
/// (and payload, for READ) comes back.
pub trait RaidBus {
    fn submit(&mut self, opcode: u64, payload: BusPayload<'_>) -> Result<u64>;
}

/// Checked round-trip: encode, submit, decode, validate the echo.
///
/// All driver and cache traffic goes through here so that every
/// response is held to the same echo-and-status contract.
pub fn exchange<B: RaidBus + ?Sized>(
    bus: &mut B,
    request: &BusRequest,
    payload: BusPayload<'_>,
) -> Result<BusResponse> {
    let word = raidline_proto::encode(request);
    trace!(
        target: "raidline::bus",
        event = "submit",
        op = %request.request_type,
        disk = request.disk,
        block_id = request.block_id,
    );
    let response_word = bus.submit(word, payload)?;
    let response = raidline_proto::decode(response_word);
    raidline_proto::check_response(request, &response)?;
    Ok(response)
}

fn block_size_mismatch(expected: usize, got: usize) -> RaidlineError {
    RaidlineError::Protocol(format!(
        "payload size mismatch: expected {expected} bytes, got {got}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raidline_proto::RequestType;

    /// Bus double that answers with a canned word.
    struct CannedBus {
        response: u64,
        last_opcode: Option<u64>,
    }

    impl RaidBus for CannedBus {
        fn submit(&mut self, opcode: u64, _payload: BusPayload<'_>) -> Result<u64> {
            self.last_opcode = Some(opcode);
            Ok(self.response)
        }
    }

    #[test]
    fn exchange_validates_the_echo() {
        let request = BusRequest::format(2);
        let mut bus = CannedBus {
            response: raidline_proto::encode(&request),
            last_opcode: None,
        };
        let response = exchange(&mut bus, &request, BusPayload::None).expect("clean echo");
        assert_eq!(response.request_type, RequestType::Format as u8);
        assert_eq!(bus.last_opcode, Some(raidline_proto::encode(&request)));
    }

    #[test]
    fn exchange_rejects_mismatched_echo() {
        let request = BusRequest::format(2);
        let mut bus = CannedBus {
            response: raidline_proto::encode(&BusRequest::format(3)),
            last_opcode: None,
        };
        let err = exchange(&mut bus, &request, BusPayload::None).expect_err("disk mismatch");
        assert!(matches!(err, RaidlineError::Protocol(_)));
    }

    #[test]
    fn exchange_rejects_status_bit() {
        let request = BusRequest::write(0, 0);
        let mut bus = CannedBus {
            response: raidline_proto::encode_response(&request, true, 0),
            last_opcode: None,
        };
        let err = exchange(&mut bus, &request, BusPayload::None).expect_err("rejected write");
        assert!(matches!(err, RaidlineError::Protocol(_)));
    }
}
