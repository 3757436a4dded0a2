// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use crate::{Error, Result, Topology, BANK_MASK, BANK_SIZE};

/// Splits reads into transfers that fit the scratch frame and stay inside
/// one bank of one device.
#[derive(Copy, Clone, Debug)]
pub struct ChunkPlanner {
    topology: Topology,
    device_size: u32,
    max_transfer: usize,
}

impl ChunkPlanner {
    pub fn new(topology: Topology, device_size: u32, max_transfer: usize) -> Self {
        ChunkPlanner { topology, device_size, max_transfer }
    }

    /// Number of logical bytes to read next, starting at device address `address`
    /// with `remaining` logical bytes still wanted.
    ///
    /// In parallel mode each device supplies half of the chunk, so the bank
    /// arithmetic is done on the halved length and the result doubled again.
    pub fn next_chunk(&self, address: u32, remaining: usize) -> Result<usize> {
        let candidate = usize::min(remaining, self.max_transfer);
        let (span, scale) = match self.topology {
            Topology::DualParallel => ((candidate + 1) / 2, 2),
            _ => (candidate, 1),
        };

        // Transfers stop at the next bank boundary, and at the end of the device
        // for devices smaller than one bank.
        let start = address as u64;
        let bank_end = (address & BANK_MASK) as u64 + BANK_SIZE as u64;
        let boundary = u64::min(bank_end, self.device_size as u64);
        let chunk = if start + span as u64 > boundary {
            let room = boundary.saturating_sub(start) as usize;
            log::trace!("Chunk at 0x{:08X} cut to {} device bytes at boundary 0x{:08X}",
                        address, room, boundary);
            room * scale
        } else {
            candidate
        };

        log::trace!("Planned chunk: address=0x{:08X} remaining={} chunk={}",
                    address, remaining, chunk);
        if chunk == 0 {
            log::error!("Planned an empty chunk at 0x{:08X}", address);
            return Err(Error::InvalidTopologyState { address, remaining });
        }
        Ok(chunk)
    }
}
