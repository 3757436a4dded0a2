// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use crate::{Error, Result, BANK_MASK};

/// Number of address bytes sent with every read; higher bits come from the bank register.
pub const ADDRESS_BYTES: usize = 3;

/// Largest number of dummy bytes any supported read command needs.
pub const MAX_DUMMY_BYTES: u8 = 8;

/// Largest command, address and dummy prefix of a read frame.
pub const FRAME_HEADER_MAX: usize = 1 + ADDRESS_BYTES + MAX_DUMMY_BYTES as usize;

/// Read instructions usable for manual reads.
///
/// All take a 3-byte address. The dual and quad variants only widen the data
/// phase, so framing is identical to `FastRead`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum ReadCommand {
    Read = 0x03,
    FastRead = 0x0B,
    DualOutputRead = 0x3B,
    QuadOutputRead = 0x6B,
}

impl ReadCommand {
    /// Number of dummy bytes the command needs at its datasheet default.
    pub fn default_dummy_bytes(self) -> u8 {
        match self {
            ReadCommand::Read => 0,
            _ => 1,
        }
    }
}

/// Read instruction and the dummy bytes sent between its address and data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadConfig {
    pub command: ReadCommand,
    pub dummy_bytes: u8,
}

impl ReadConfig {
    /// Candidates tried by [`FlashSession::probe_read_config`], fastest first.
    ///
    /// [`FlashSession::probe_read_config`]: crate::FlashSession::probe_read_config
    pub const PROBE_ORDER: [ReadConfig; 3] = [
        ReadConfig { command: ReadCommand::QuadOutputRead, dummy_bytes: 1 },
        ReadConfig { command: ReadCommand::DualOutputRead, dummy_bytes: 1 },
        ReadConfig { command: ReadCommand::Read, dummy_bytes: 0 },
    ];

    pub fn new(command: ReadCommand, dummy_bytes: u8) -> Self {
        ReadConfig { command, dummy_bytes }
    }

    /// Use `command` with its default number of dummy bytes.
    pub fn standard(command: ReadCommand) -> Self {
        Self::new(command, command.default_dummy_bytes())
    }

    /// Length of the command, address and dummy prefix of every read frame.
    pub fn header_len(&self) -> usize {
        1 + ADDRESS_BYTES + self.dummy_bytes as usize
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dummy_bytes > MAX_DUMMY_BYTES {
            log::error!("{} dummy bytes requested, at most {} supported",
                        self.dummy_bytes, MAX_DUMMY_BYTES);
            Err(Error::InvalidConfiguration("too many dummy bytes"))
        } else {
            Ok(())
        }
    }

    /// Fill `buf` with the read frame prefix for device `address`,
    /// returning the prefix length.
    ///
    /// Only the in-bank part of the address is sent.
    pub(crate) fn make_header(&self, address: u32, buf: &mut [u8; FRAME_HEADER_MAX]) -> usize {
        let len = self.header_len();
        let bytes = (address & !BANK_MASK).to_be_bytes();
        buf[0] = self.command.into();
        buf[1..1 + ADDRESS_BYTES].copy_from_slice(&bytes[1..]);
        for b in buf[1 + ADDRESS_BYTES..len].iter_mut() {
            *b = 0;
        }
        len
    }
}

impl Default for ReadConfig {
    fn default() -> Self {
        ReadConfig::standard(ReadCommand::QuadOutputRead)
    }
}
