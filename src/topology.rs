// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

/// How the flash devices are wired to the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    /// One device on one chip-select.
    Single,
    /// Two devices in lockstep on separate data buses, each holding
    /// alternate bytes of the logical image.
    DualParallel,
    /// Two devices sharing a bus on separate chip-selects, the upper
    /// device holding the second half of the logical image.
    DualStacked,
}

/// One of the two chip-selects of a dual flash array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Chip {
    Lower,
    Upper,
}

impl Chip {
    /// Index of the chip, used for per-device state.
    pub fn index(self) -> usize {
        match self {
            Chip::Lower => 0,
            Chip::Upper => 1,
        }
    }

    /// The other chip of the pair.
    pub fn other(self) -> Self {
        match self {
            Chip::Lower => Chip::Upper,
            Chip::Upper => Chip::Lower,
        }
    }
}

/// The device and device address a logical address resolves to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhysicalTarget {
    pub chip: Chip,
    pub address: u32,
}

impl Topology {
    /// Total logical capacity in bytes for devices of `device_size` bytes each.
    pub fn total_size(self, device_size: u32) -> u64 {
        match self {
            Topology::Single => device_size as u64,
            Topology::DualParallel | Topology::DualStacked => 2 * device_size as u64,
        }
    }

    /// Number of devices with their own bank register and chip-select state.
    ///
    /// Parallel devices always receive the same commands, so they count as one.
    pub fn chips(self) -> usize {
        match self {
            Topology::Single | Topology::DualParallel => 1,
            Topology::DualStacked => 2,
        }
    }

    /// Map a logical address onto a device and device address.
    pub fn translate(self, address: u32, device_size: u32) -> PhysicalTarget {
        match self {
            Topology::Single => PhysicalTarget { chip: Chip::Lower, address },
            Topology::DualParallel => PhysicalTarget { chip: Chip::Lower, address: address / 2 },
            Topology::DualStacked => {
                if address < device_size {
                    PhysicalTarget { chip: Chip::Lower, address }
                } else {
                    PhysicalTarget { chip: Chip::Upper, address: address - device_size }
                }
            }
        }
    }
}
