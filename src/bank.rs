// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use crate::{AnyhowResult, Chip, Command, Error, FlashAccess, Result, Vendor, BANK_SIZE};

/// Protocol used to write a device's bank (extended address) register.
///
/// Every device larger than 16MB powers up in bank 0, and 3-byte addresses
/// only reach into the currently selected bank.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BankSelect {
    /// Extended address register, 0xC5 to write and 0xC8 to read.
    /// Writes are ignored unless preceded by WriteEnable (0x06).
    ExtendedAddress,
    /// Bank address register, 0x17 to write and 0x16 to read.
    /// Writable without WriteEnable.
    BankRegister,
}

impl BankSelect {
    /// Bank register protocol used by `vendor`.
    pub fn for_vendor(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Micron | Vendor::Winbond => BankSelect::ExtendedAddress,
            Vendor::Spansion => BankSelect::BankRegister,
        }
    }

    fn write_opcode(self) -> u8 {
        match self {
            BankSelect::ExtendedAddress => Command::ExtendedAddressWrite.into(),
            BankSelect::BankRegister => Command::BankRegisterWrite.into(),
        }
    }

    fn read_opcode(self) -> u8 {
        match self {
            BankSelect::ExtendedAddress => Command::ExtendedAddressRead.into(),
            BankSelect::BankRegister => Command::BankRegisterRead.into(),
        }
    }

    /// Select `bank` on the currently addressed device and verify it took effect.
    ///
    /// A failed exchange is reported as `BankSelectFailed`, while a register
    /// that reads back a different bank is reported as `BankSelectMismatch`.
    /// Neither is retried.
    pub fn select<A: FlashAccess>(self, access: &mut A, bank: u8) -> Result<()> {
        log::debug!("Selecting bank {} via {:?}", bank, self);
        self.write_bank(access, bank).map_err(|e| bank_select_failed(bank, e))?;
        let read = self.read_bank(access).map_err(|e| bank_select_failed(bank, e))?;
        if read != bank {
            log::error!("Bank select mismatch: selected {}, register reads {}", bank, read);
            Err(Error::BankSelectMismatch { bank, read })
        } else {
            Ok(())
        }
    }

    /// Read the bank register of the currently addressed device.
    pub fn read_bank<A: FlashAccess>(self, access: &mut A) -> AnyhowResult<u8> {
        let mut rx = [0u8; 2];
        access.exchange(&[self.read_opcode()], &mut rx)?;
        log::trace!("Bank register reads {}", rx[1]);
        Ok(rx[1])
    }

    fn write_bank<A: FlashAccess>(self, access: &mut A, bank: u8) -> AnyhowResult<()> {
        if self == BankSelect::ExtendedAddress {
            access.write(&[u8::from(Command::WriteEnable)])?;
        }
        access.write(&[self.write_opcode(), bank])
    }
}

#[cfg(feature = "std")]
fn bank_select_failed(bank: u8, source: anyhow::Error) -> Error {
    Error::BankSelectFailed { bank, source }
}

#[cfg(not(feature = "std"))]
fn bank_select_failed(bank: u8, _source: Error) -> Error {
    Error::BankSelectFailed { bank }
}

/// Bank holding device address `address`.
pub fn bank_index(address: u32) -> u8 {
    (address / BANK_SIZE) as u8
}

/// Last bank successfully selected on each device.
///
/// `None` means the register state is unknown, so the next access must
/// select a bank before reading even if it wants bank 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BankCache([Option<u8>; 2]);

impl BankCache {
    /// Power-on state: every device in bank 0.
    pub fn baseline() -> Self {
        BankCache([Some(0); 2])
    }

    pub fn get(&self, chip: Chip) -> Option<u8> {
        self.0[chip.index()]
    }

    pub fn set(&mut self, chip: Chip, bank: Option<u8>) {
        self.0[chip.index()] = bank;
    }

    pub fn invalidate(&mut self) {
        self.0 = [None; 2];
    }
}
