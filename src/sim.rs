// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! Simulated flash array for tests.
//!
//! Device contents are generated from the address, so large devices cost
//! nothing; individual bytes can be overridden with `set_logical`.

use std::collections::BTreeMap;

use crate::{BankSelect, Chip, FlashAccess, Topology, Vendor, BANK_SIZE};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    ChipSelect(Chip),
    WriteEnable(Chip),
    BankWrite { chip: Chip, bank: u8 },
    BankRead(Chip),
    ReadId(Chip),
    Read { chip: Chip, address: u32, len: usize },
}

#[derive(Copy, Clone, Debug, Default)]
struct Device {
    bank: u8,
    wel: bool,
}

pub(crate) struct SimFlash {
    topology: Topology,
    family: BankSelect,
    id: [u8; 3],
    device_size: u32,
    devices: [Device; 2],
    patches: BTreeMap<(usize, u32), u8>,
    chip: Chip,
    events: Vec<Event>,
    transfers: usize,
    fail_at: Option<usize>,
    bank_stuck: bool,
    quad_enabled: bool,
}

impl SimFlash {
    pub fn new(topology: Topology, vendor: Vendor, device_size: u32) -> Self {
        let capacity_code = match device_size >> 20 {
            16 => 0x18,
            32 => 0x19,
            64 => 0x20,
            128 => 0x21,
            _ => 0x00,
        };
        SimFlash {
            topology,
            family: BankSelect::for_vendor(vendor),
            id: [vendor as u8, 0xBA, capacity_code],
            device_size,
            devices: [Device::default(); 2],
            patches: BTreeMap::new(),
            chip: Chip::Lower,
            events: Vec::new(),
            transfers: 0,
            fail_at: None,
            bank_stuck: false,
            quad_enabled: true,
        }
    }

    pub fn set_id(&mut self, id: [u8; 3]) {
        self.id = id;
    }

    /// Fail the `n`th exchange from now.
    pub fn fail_transfer(&mut self, n: usize) {
        self.fail_at = Some(self.transfers + n);
    }

    /// Make bank register writes have no effect.
    pub fn set_bank_stuck(&mut self, stuck: bool) {
        self.bank_stuck = stuck;
    }

    /// Make quad output reads return only 1s, as if QE were clear.
    pub fn set_quad_enabled(&mut self, enabled: bool) {
        self.quad_enabled = enabled;
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn bank(&self, chip: Chip) -> u8 {
        self.devices[chip.index()].bank
    }

    pub fn chip(&self) -> Chip {
        self.chip
    }

    pub fn reads(&self) -> Vec<(Chip, u32, usize)> {
        self.events.iter().filter_map(|e| match *e {
            Event::Read { chip, address, len } => Some((chip, address, len)),
            _ => None,
        }).collect()
    }

    pub fn bank_writes(&self) -> Vec<(Chip, u8)> {
        self.events.iter().filter_map(|e| match *e {
            Event::BankWrite { chip, bank } => Some((chip, bank)),
            _ => None,
        }).collect()
    }

    /// Expected contents of the logical image.
    pub fn expected(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32).map(|i| {
            let (dev, phys) = self.locate(address + i);
            self.byte(dev, phys)
        }).collect()
    }

    /// Overwrite bytes of the logical image.
    pub fn set_logical(&mut self, address: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            let loc = self.locate(address + i as u32);
            self.patches.insert(loc, b);
        }
    }

    fn locate(&self, logical: u32) -> (usize, u32) {
        match self.topology {
            Topology::Single => (0, logical),
            Topology::DualParallel => ((logical % 2) as usize, logical / 2),
            Topology::DualStacked if logical < self.device_size => (0, logical),
            Topology::DualStacked => (1, logical - self.device_size),
        }
    }

    fn byte(&self, dev: usize, addr: u32) -> u8 {
        assert!(addr < self.device_size, "read beyond device end at 0x{:08X}", addr);
        match self.patches.get(&(dev, addr)) {
            Some(&b) => b,
            None => {
                let x = addr.wrapping_mul(0x9E37_79B1) ^ ((dev as u32) << 7);
                (x >> 24) as u8 ^ addr as u8
            }
        }
    }

    /// Devices receiving the current command.
    fn targets(&self) -> &'static [usize] {
        match (self.topology, self.chip) {
            (Topology::Single, _) => &[0],
            (Topology::DualParallel, _) => &[0, 1],
            (Topology::DualStacked, Chip::Lower) => &[0],
            (Topology::DualStacked, Chip::Upper) => &[1],
        }
    }

    fn event_chip(&self) -> Chip {
        match self.topology {
            Topology::DualStacked => self.chip,
            _ => Chip::Lower,
        }
    }

    fn write_bank(&mut self, opcode: u8, bank: u8) {
        let accepted = match self.family {
            BankSelect::ExtendedAddress => opcode == 0xC5,
            BankSelect::BankRegister => opcode == 0x17,
        };
        let needs_wel = self.family == BankSelect::ExtendedAddress;
        for &dev in self.targets() {
            let device = &mut self.devices[dev];
            if accepted && (device.wel || !needs_wel) && !self.bank_stuck {
                device.bank = bank;
            }
            device.wel = false;
        }
        self.events.push(Event::BankWrite { chip: self.event_chip(), bank });
    }

    fn read_data(&mut self, opcode: u8, rx: &mut [u8]) {
        let dummy = match opcode {
            0x03 => Some(0),
            0x0B | 0x3B => Some(1),
            _ if self.quad_enabled => Some(1),
            _ => None,
        };
        let header = 4 + dummy.unwrap_or(1);
        if rx.len() <= header {
            return;
        }
        let dev0 = self.targets()[0];
        let base = self.devices[dev0].bank as u32 * BANK_SIZE
            | u32::from_be_bytes([0, rx_addr(rx)[0], rx_addr(rx)[1], rx_addr(rx)[2]]);
        let len = rx.len() - header;
        self.events.push(Event::Read { chip: self.event_chip(), address: base, len });
        if dummy.is_none() {
            return;
        }
        for i in 0..len {
            rx[header + i] = match self.topology {
                Topology::DualParallel => self.byte(i % 2, base + (i / 2) as u32),
                _ => self.byte(dev0, base + i as u32),
            };
        }
    }
}

/// Address bytes of the frame, which were copied into the echo area.
fn rx_addr(rx: &[u8]) -> [u8; 3] {
    [rx[1], rx[2], rx[3]]
}

impl FlashAccess for SimFlash {
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> anyhow::Result<()> {
        let n = self.transfers;
        self.transfers += 1;
        if self.fail_at == Some(n) {
            anyhow::bail!("simulated bus fault on transfer {}", n);
        }

        // The echo area holds whatever was clocked out; the rest reads as 1s
        // until a command drives it.
        for (i, b) in rx.iter_mut().enumerate() {
            *b = if i < tx.len() { tx[i] } else { 0xFF };
        }

        let chip = self.event_chip();
        match tx[0] {
            0x06 => {
                for &dev in self.targets() {
                    self.devices[dev].wel = true;
                }
                self.events.push(Event::WriteEnable(chip));
            }
            op @ 0xC5 | op @ 0x17 => self.write_bank(op, tx[1]),
            op @ 0xC8 | op @ 0x16 => {
                let reads_family = match self.family {
                    BankSelect::ExtendedAddress => op == 0xC8,
                    BankSelect::BankRegister => op == 0x16,
                };
                if rx.len() > 1 && reads_family {
                    rx[1] = self.devices[self.targets()[0]].bank;
                }
                self.events.push(Event::BankRead(chip));
            }
            0x9F => {
                for (i, b) in rx.iter_mut().skip(1).take(3).enumerate() {
                    *b = self.id[i];
                }
                self.events.push(Event::ReadId(chip));
            }
            op @ 0x03 | op @ 0x0B | op @ 0x3B | op @ 0x6B => self.read_data(op, rx),
            op => panic!("unexpected opcode 0x{:02X}", op),
        }
        Ok(())
    }

    fn select_chip(&mut self, chip: Chip) -> anyhow::Result<()> {
        self.chip = chip;
        self.events.push(Event::ChipSelect(chip));
        Ok(())
    }
}
