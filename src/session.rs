// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

#[cfg(feature = "std")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::bank::{bank_index, BankCache};
use crate::read::FRAME_HEADER_MAX;
use crate::{id, BankSelect, Chip, ChunkPlanner, Error, FlashAccess, FlashID, ReadConfig, Result,
            Topology, BANK_SIZE, MAX_TRANSFER_UNIT};

/// Largest supported device; keeps every logical address and bank index in range.
const MAX_DEVICE_SIZE: u32 = 1 << 30;

/// Memory-mapped view of the flash, as provided by the controller's linear mode.
#[derive(Copy, Clone, Debug)]
pub struct LinearWindow {
    base: *const u32,
    len: usize,
}

impl LinearWindow {
    /// Describe a linear window of `len` bytes mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must stay valid for 32-bit volatile reads of `len` bytes for as
    /// long as any session uses the window.
    ///
    /// Both `base` and `len` must be multiples of 4, since the window is only
    /// ever read a whole word at a time.
    pub unsafe fn new(base: *const u8, len: usize) -> Result<Self> {
        if base as usize % 4 != 0 {
            log::error!("Linear window base {:p} is not word aligned", base);
            return Err(Error::InvalidConfiguration("linear window not word aligned"));
        }
        if len % 4 != 0 {
            log::error!("Linear window length {} is not a whole number of words", len);
            return Err(Error::InvalidConfiguration("linear window length not word aligned"));
        }
        Ok(LinearWindow { base: base as *const u32, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Copy `data.len()` bytes from `offset` using whole-word reads.
    ///
    /// Words covering a partial head or tail are read in full, and only the
    /// requested bytes are stored.
    fn copy(&self, offset: u32, data: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        let first = start & !3;
        let last = (end + 3) & !3;
        if last > self.len {
            return Err(Error::InvalidAddress { address: (end - 1) as u32 });
        }
        log::trace!("Linear read: 0x{:08X}..0x{:08X}", first, last);
        for word_addr in (first..last).step_by(4) {
            // Safe since the whole range was checked against the window above.
            let word = unsafe { core::ptr::read_volatile(self.base.add(word_addr / 4)) };
            for (i, b) in word.to_ne_bytes().iter().enumerate() {
                let addr = word_addr + i;
                if addr >= start && addr < end {
                    data[addr - start] = *b;
                }
            }
        }
        Ok(())
    }
}

/// How a session reaches the flash contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Plain memory reads from the controller's linear window.
    Linear,
    /// Framed read commands through [`FlashAccess`].
    Manual,
}

/// Fixed description of the flash array, established once at start of day.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub topology: Topology,
    /// Capacity of one physical device in bytes.
    pub device_size: u32,
    pub bank_select: BankSelect,
    pub read: ReadConfig,
    /// Largest number of data bytes moved by one read transfer.
    pub max_transfer: usize,
    /// Linear window, used when the array is small enough to be fully mapped.
    pub linear: Option<LinearWindow>,
}

impl Config {
    /// Configuration with quad output reads, full-size transfers and no linear window.
    pub fn new(topology: Topology, device_size: u32, bank_select: BankSelect) -> Self {
        Config {
            topology,
            device_size,
            bank_select,
            read: ReadConfig::default(),
            max_transfer: MAX_TRANSFER_UNIT,
            linear: None,
        }
    }

    /// Configuration for devices identified by `id`.
    pub fn from_id(topology: Topology, id: &FlashID) -> Result<Self> {
        let vendor = match id.vendor() {
            Some(vendor) => vendor,
            None => {
                log::error!("No bank select protocol known for manufacturer 0x{:02X}",
                            id.manufacturer_id);
                return Err(Error::InvalidManufacturer { id: id.manufacturer_id });
            }
        };
        let device_size = match id.device_size() {
            Some(size) => size,
            None => {
                log::error!("Unknown capacity code 0x{:02X}", id.capacity_code);
                return Err(Error::InvalidCapacity { code: id.capacity_code });
            }
        };
        log::debug!("Flash is {:?}, {} bytes per device", vendor, device_size);
        Ok(Config::new(topology, device_size, BankSelect::for_vendor(vendor)))
    }

    /// Total logical capacity in bytes.
    pub fn total_size(&self) -> u64 {
        self.topology.total_size(self.device_size)
    }

    /// Linear mode is only possible when the whole device fits in one bank,
    /// and the controller cannot map a stacked pair.
    pub fn access_mode(&self) -> AccessMode {
        let eligible = self.topology != Topology::DualStacked && self.device_size <= BANK_SIZE;
        if eligible && self.linear.is_some() {
            AccessMode::Linear
        } else {
            AccessMode::Manual
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device_size == 0 || !self.device_size.is_power_of_two() {
            log::error!("Device size {} is not a power of two", self.device_size);
            return Err(Error::InvalidConfiguration("device size must be a power of two"));
        }
        if self.device_size > MAX_DEVICE_SIZE {
            log::error!("Device size {} exceeds {}", self.device_size, MAX_DEVICE_SIZE);
            return Err(Error::InvalidConfiguration("device size too large"));
        }
        if self.max_transfer == 0 || self.max_transfer > MAX_TRANSFER_UNIT {
            log::error!("Transfer size {} outside 1..={}", self.max_transfer, MAX_TRANSFER_UNIT);
            return Err(Error::InvalidConfiguration("invalid transfer size"));
        }
        if self.topology == Topology::DualParallel && self.max_transfer % 2 != 0 {
            return Err(Error::InvalidConfiguration("parallel transfer size must be even"));
        }
        self.read.validate()?;
        if let Some(window) = self.linear {
            if (window.len() as u64) < self.total_size() {
                log::error!("Linear window of {} bytes cannot map {} bytes",
                            window.len(), self.total_size());
                return Err(Error::InvalidConfiguration("linear window too small"));
            }
        }
        Ok(())
    }
}

/// Boot-time flash reader.
///
/// The session owns the scratch frames, the bank each device is known to be
/// in, and which chip-select is asserted. Between calls to [`access`] every
/// device is back in bank 0 and the lower chip is selected.
///
/// [`access`]: FlashSession::access
pub struct FlashSession<'a, A: FlashAccess> {
    access: &'a mut A,
    config: Config,
    planner: ChunkPlanner,
    mode: AccessMode,

    /// Devices larger than one bank need their bank register managed.
    banked: bool,
    banks: BankCache,

    /// Asserted chip-select, `None` if a switch failed part way.
    chip: Option<Chip>,

    tx: [u8; FRAME_HEADER_MAX],
    rx: [u8; MAX_TRANSFER_UNIT + FRAME_HEADER_MAX],
}

impl<'a, A: FlashAccess> FlashSession<'a, A> {
    #[cfg(feature = "std")]
    const DATA_PROGRESS_TPL: &'static str =
        " {msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}; {eta_precise})";
    #[cfg(feature = "std")]
    const DATA_PROGRESS_CHARS: &'static str = "=> ";

    /// Create a session for an already configured controller.
    ///
    /// The controller is expected to have the lower chip selected, and the
    /// devices to be in bank 0 as they are after power-on.
    pub fn new(access: &'a mut A, config: Config) -> Result<Self> {
        config.validate()?;
        let mode = config.access_mode();
        let banked = config.device_size > BANK_SIZE;
        log::debug!("{:?} flash, {} bytes per device, {:?} access{}",
                    config.topology, config.device_size, mode,
                    if banked { ", banked" } else { "" });
        if config.linear.is_some() && mode == AccessMode::Manual {
            log::debug!("Linear window cannot map this array, using manual reads");
        }
        Ok(FlashSession {
            access,
            planner: ChunkPlanner::new(config.topology, config.device_size, config.max_transfer),
            config,
            mode,
            banked,
            banks: BankCache::baseline(),
            chip: Some(Chip::Lower),
            tx: [0; FRAME_HEADER_MAX],
            rx: [0; MAX_TRANSFER_UNIT + FRAME_HEADER_MAX],
        })
    }

    /// Read the flash ID and create a session for `topology` from it.
    pub fn identify(access: &'a mut A, topology: Topology) -> Result<Self> {
        let id = id::read_id(&mut *access)?;
        Self::new(access, Config::from_id(topology, &id)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// Total logical capacity in bytes.
    pub fn total_size(&self) -> u64 {
        self.config.total_size()
    }

    pub fn read_config(&self) -> ReadConfig {
        self.config.read
    }

    /// Change the read command used for manual reads.
    ///
    /// In linear mode the read command is part of the controller setup instead.
    pub fn set_read_config(&mut self, read: ReadConfig) -> Result<()> {
        read.validate()?;
        log::debug!("Using {:?} with {} dummy bytes", read.command, read.dummy_bytes);
        self.config.read = read;
        Ok(())
    }

    /// Copy `data.len()` bytes starting at logical flash address `address` into `data`.
    ///
    /// On error, bytes of chunks completed before the failure are left in `data`.
    pub fn access(&mut self, address: u32, data: &mut [u8]) -> Result<()> {
        self.access_cb(address, data, |_| {})
    }

    /// Copy `data.len()` bytes starting at logical flash address `address` into `data`.
    ///
    /// This method is similar to `access()`, except it calls the provided
    /// callback function with the number of bytes copied so far, once before
    /// the first transfer and after every chunk.
    pub fn access_cb<F: FnMut(usize)>(&mut self, address: u32, data: &mut [u8], mut cb: F)
        -> Result<()>
    {
        if data.is_empty() {
            return Ok(());
        }
        self.check_address_length(address, data.len())?;
        cb(0);
        match (self.mode, self.config.linear) {
            (AccessMode::Linear, Some(window)) => {
                window.copy(address, data)?;
                cb(data.len());
                Ok(())
            }
            _ => {
                let guard = AccessGuard::new(self);
                guard.session.copy_chunks(address, data, &mut cb)?;
                guard.finish()
            }
        }
    }

    /// Copy `data.len()` bytes starting at logical flash address `address` into `data`.
    ///
    /// This method is similar to `access()`, except it renders a progress
    /// bar to the terminal during the read.
    #[cfg(feature = "std")]
    pub fn access_progress(&mut self, address: u32, data: &mut [u8]) -> Result<()> {
        let pb = ProgressBar::new(data.len() as u64).with_style(ProgressStyle::default_bar()
            .template(Self::DATA_PROGRESS_TPL).progress_chars(Self::DATA_PROGRESS_CHARS));
        pb.set_message("Reading");
        let result = self.access_cb(address, data, |n| pb.set_position(n as u64));
        pb.finish();
        result
    }

    /// Read through the manual path in chunks that never leave one bank of one device.
    fn copy_chunks<F: FnMut(usize)>(&mut self, address: u32, data: &mut [u8], cb: &mut F)
        -> Result<()>
    {
        let topology = self.config.topology;
        let mut address = address;
        let mut done = 0;
        while done < data.len() {
            let remaining = data.len() - done;
            let target = topology.translate(address, self.config.device_size);
            if topology == Topology::DualStacked {
                self.assert_chip(target.chip)?;
            }
            if self.banked {
                let bank = bank_index(target.address);
                if self.banks.get(target.chip) != Some(bank) {
                    self.select_bank(target.chip, bank)?;
                }
            }
            let chunk = self.planner.next_chunk(target.address, remaining)?;
            self.read_chunk(target.address, &mut data[done..done + chunk])?;
            done += chunk;
            address += chunk as u32;
            cb(done);
        }
        Ok(())
    }

    /// Issue one read command for device address `address` and copy out its data.
    fn read_chunk(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        let header = self.config.read.make_header(address, &mut self.tx);
        let frame = header + out.len();
        log::trace!("Read frame {:02X?}, {} data bytes", &self.tx[..header], out.len());
        self.access.exchange(&self.tx[..header], &mut self.rx[..frame])?;
        out.copy_from_slice(&self.rx[header..frame]);
        Ok(())
    }

    fn assert_chip(&mut self, chip: Chip) -> Result<()> {
        if self.chip != Some(chip) {
            log::debug!("Asserting {:?} chip-select", chip);
            self.chip = None;
            self.access.select_chip(chip)?;
            self.chip = Some(chip);
        }
        Ok(())
    }

    /// Select `bank` on `chip`, recording it only once the device confirms it.
    fn select_bank(&mut self, chip: Chip, bank: u8) -> Result<()> {
        if self.config.topology == Topology::DualStacked {
            self.assert_chip(chip)?;
        }
        match self.config.bank_select.select(&mut *self.access, bank) {
            Ok(()) => {
                self.banks.set(chip, Some(bank));
                Ok(())
            }
            Err(e) => {
                self.banks.set(chip, None);
                Err(e)
            }
        }
    }

    /// Put every device back in bank 0 and reassert the lower chip.
    ///
    /// Bank 0 is only reselected on devices not already known to be in it,
    /// so unbanked devices and devices whose cached bank is 0 see no bank
    /// commands. After a failed access the cache is cleared first, which
    /// forces the reset on every banked device.
    ///
    /// All steps are attempted; the first error is returned.
    fn restore_baseline(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.banked {
            let current = self.chip.unwrap_or(Chip::Lower);
            let order = [current, current.other()];
            for &chip in order.iter().take(self.config.topology.chips()) {
                if self.banks.get(chip) == Some(0) {
                    continue;
                }
                log::debug!("Restoring bank 0 on {:?}", chip);
                if let Err(e) = self.select_bank(chip, 0) {
                    log::warn!("Could not restore bank 0 on {:?}: {:?}", chip, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        if self.config.topology == Topology::DualStacked {
            if let Err(e) = self.assert_chip(Chip::Lower) {
                log::warn!("Could not reassert lower chip-select: {:?}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Checks the logical range `address..address+length` is readable:
    /// * it must lie entirely within the flash
    /// * parallel arrays must start on a byte pair
    /// Returns either Err(Error::InvalidAddress) or Ok(()).
    fn check_address_length(&self, address: u32, length: usize) -> Result<()> {
        log::trace!("Checking address={:08X} length={}", address, length);
        let end = address as u64 + length as u64;
        if end > self.total_size() {
            log::error!("Access would exceed flash capacity");
            let last = u64::min(end - 1, u32::MAX as u64) as u32;
            Err(Error::InvalidAddress { address: last })
        } else if self.config.topology == Topology::DualParallel && address % 2 != 0 {
            log::error!("Parallel flash access must start on an even address");
            Err(Error::InvalidAddress { address })
        } else {
            Ok(())
        }
    }
}

/// Restores the baseline bank and chip-select when a manual access ends.
///
/// `finish()` reports restore errors on the success path. If the access fails
/// instead, dropping the guard forgets every cached bank, restores the
/// baseline and logs any further error, so the caller sees the original one.
struct AccessGuard<'s, 'a, A: FlashAccess> {
    session: &'s mut FlashSession<'a, A>,
    armed: bool,
}

impl<'s, 'a, A: FlashAccess> AccessGuard<'s, 'a, A> {
    fn new(session: &'s mut FlashSession<'a, A>) -> Self {
        AccessGuard { session, armed: true }
    }

    fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.session.restore_baseline()
    }
}

impl<'s, 'a, A: FlashAccess> Drop for AccessGuard<'s, 'a, A> {
    fn drop(&mut self) {
        if self.armed {
            self.session.banks.invalidate();
            if let Err(e) = self.session.restore_baseline() {
                log::warn!("Flash state unknown after failed access: {:?}", e);
            }
        }
    }
}
