//! TCP transport for the RAID bus.
//!
//! Wire framing, both directions: the 64-bit opcode in network byte
//! order, then a 64-bit payload length in network byte order, then the
//! payload bytes. READ and WRITE carry exactly one block; every other
//! request carries a zero length.

use crate::{BusPayload, RaidBus, block_size_mismatch};
use raidline_error::{RaidlineError, Result};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// Blocking client connection to a remote RAID array.
pub struct TcpRaidBus {
    stream: TcpStream,
}

impl TcpRaidBus {
    /// Connect to the array. The protocol has no handshake; the first
    /// INIT opcode the driver sends is what brings the array up.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!(
            target: "raidline::bus",
            event = "connected",
            peer = %stream.peer_addr()?,
        );
        Ok(Self { stream })
    }

    fn send_word(&mut self, word: u64) -> Result<()> {
        self.stream.write_all(&word.to_be_bytes())?;
        Ok(())
    }

    fn recv_word(&mut self) -> Result<u64> {
        let mut raw = [0_u8; 8];
        self.stream.read_exact(&mut raw)?;
        Ok(u64::from_be_bytes(raw))
    }
}

impl RaidBus for TcpRaidBus {
    fn submit(&mut self, opcode: u64, mut payload: BusPayload<'_>) -> Result<u64> {
        self.send_word(opcode)?;

        let out_len = match &payload {
            BusPayload::Write(buf) => buf.len(),
            _ => 0,
        };
        self.send_word(out_len as u64)?;
        if let BusPayload::Write(buf) = &payload {
            self.stream.write_all(buf)?;
        }
        self.stream.flush()?;

        let response = self.recv_word()?;
        let raw_len = self.recv_word()?;
        let in_len = usize::try_from(raw_len).map_err(|_| {
            RaidlineError::Protocol(format!("response payload length {raw_len} overflows"))
        })?;

        match &mut payload {
            BusPayload::Read(buf) => {
                if in_len != buf.len() {
                    return Err(block_size_mismatch(buf.len(), in_len));
                }
                self.stream.read_exact(buf)?;
            }
            _ => {
                if in_len != 0 {
                    return Err(block_size_mismatch(0, in_len));
                }
            }
        }

        trace!(
            target: "raidline::bus",
            event = "exchange_complete",
            sent_bytes = out_len,
            received_bytes = in_len,
        );
        Ok(response)
    }
}
