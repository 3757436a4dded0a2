// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! qspi-boot
//!
//! This crate reads boot images out of serial NOR flash attached to a QSPI
//! controller, presenting one flat logical address space over a single
//! device, two devices wired in parallel, or two devices stacked on
//! separate chip-selects. Devices larger than 16MB are reached through
//! their bank (extended address) register.
//!
//! Controller bring-up is left to the caller, which supplies the raw
//! transfer primitive by implementing [`FlashAccess`] and then builds a
//! [`FlashSession`] to pull image bytes from flash.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod bank;
pub mod chunk;
pub mod id;
pub mod probe;
pub mod read;
pub mod session;
pub mod topology;

#[cfg(test)]
mod sim;

pub use bank::BankSelect;
pub use chunk::ChunkPlanner;
pub use id::{FlashID, Vendor};
pub use probe::BootHeader;
pub use read::{ReadCommand, ReadConfig};
pub use session::{AccessMode, Config, FlashSession, LinearWindow};
pub use topology::{Chip, PhysicalTarget, Topology};

#[cfg(feature = "std")]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Flash transfer failed.")]
    TransferFailed(#[from] anyhow::Error),
    #[error("Failed to select bank {bank}.")]
    BankSelectFailed {
        bank: u8,
        #[source]
        source: anyhow::Error,
    },
    #[error("Bank register reads {read} after selecting bank {bank}.")]
    BankSelectMismatch { bank: u8, read: u8 },
    #[error("Invalid chunk planned at 0x{address:08X} with {remaining} bytes remaining.")]
    InvalidTopologyState { address: u32, remaining: usize },
    #[error("Address out of range for memory: 0x{address:08X}.")]
    InvalidAddress { address: u32 },
    #[error("Unsupported manufacturer ID 0x{id:02X}.")]
    InvalidManufacturer { id: u8 },
    #[error("Unsupported capacity code 0x{code:02X}.")]
    InvalidCapacity { code: u8 },
    #[error("Invalid configuration: {0}.")]
    InvalidConfiguration(&'static str),
}
#[cfg(not(feature = "std"))]
#[derive(Debug)]
pub enum Error {
    TransferFailed,
    BankSelectFailed { bank: u8 },
    BankSelectMismatch { bank: u8, read: u8 },
    InvalidTopologyState { address: u32, remaining: usize },
    InvalidAddress { address: u32 },
    InvalidManufacturer { id: u8 },
    InvalidCapacity { code: u8 },
    InvalidConfiguration(&'static str),
}

#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, Error>;
#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(feature = "std")]
pub type AnyhowResult<T> = anyhow::Result<T>;
#[cfg(not(feature = "std"))]
pub type AnyhowResult<T> = Result<T>;

/// Size of one bank, the window reachable with a 3-byte address.
pub const BANK_SIZE: u32 = 16 * 1024 * 1024;

/// Mask selecting the bank bits of a physical address.
pub const BANK_MASK: u32 = !(BANK_SIZE - 1);

/// Largest number of data bytes moved by a single read transfer.
pub const MAX_TRANSFER_UNIT: usize = 4096;

/// Trait for objects which provide access to the QSPI controller.
///
/// Transfers are half-duplex frames: everything in `tx` is clocked out first,
/// and the received frame lines up with it byte for byte, so the response to
/// a command starts after the command, address and dummy bytes.
pub trait FlashAccess {
    /// Write all bytes in `tx` to the currently selected flash, ignoring any response.
    fn write(&mut self, tx: &[u8]) -> AnyhowResult<()> {
        // Default implementation uses `exchange()` and captures nothing.
        self.exchange(tx, &mut [])
    }

    /// Write `tx`, padded with zeros up to `rx.len()` bytes, while capturing the
    /// whole frame into `rx`.
    ///
    /// When `rx` is shorter than `tx`, all of `tx` is still written.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> AnyhowResult<()>;

    /// Assert the chip-select for `chip`, deasserting the other one.
    ///
    /// Only called for stacked arrays; other wirings may do nothing here.
    fn select_chip(&mut self, chip: Chip) -> AnyhowResult<()>;
}

/// SPI flash command opcodes used by the boot reader.
///
/// Bank register commands differ by vendor; see [`BankSelect`].
/// Read instructions are listed in [`ReadCommand`].
#[derive(Copy, Clone, Debug, num_enum::IntoPrimitive)]
#[repr(u8)]
pub(crate) enum Command {
    WriteEnable = 0x06,
    ReadJEDECID = 0x9F,

    // Spansion bank address register.
    BankRegisterRead = 0x16,
    BankRegisterWrite = 0x17,

    // Micron and Winbond extended address register.
    ExtendedAddressRead = 0xC8,
    ExtendedAddressWrite = 0xC5,
}
