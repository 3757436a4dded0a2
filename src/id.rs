// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use core::convert::TryFrom;

use crate::{Command, Error, FlashAccess, Result};

/// Manufacturers whose bank register protocol is known.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Vendor {
    Spansion = 0x01,
    Micron = 0x20,
    Winbond = 0xEF,
}

/// Store the ID read off a QSPI flash memory.
///
/// The manufacturer ID, memory type and capacity code are the three bytes
/// returned by the 0x9F command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashID {
    pub manufacturer_id: u8,
    pub memory_type: u8,
    pub capacity_code: u8,
}

impl FlashID {
    /// The vendor, if it is one the bank selector supports.
    pub fn vendor(&self) -> Option<Vendor> {
        Vendor::try_from(self.manufacturer_id).ok()
    }

    /// Capacity of one device in bytes, if the capacity code is known.
    pub fn device_size(&self) -> Option<u32> {
        const MB: u32 = 1024 * 1024;
        match self.capacity_code {
            0x18 => Some(16 * MB),
            0x19 => Some(32 * MB),
            0x20 => Some(64 * MB),
            0x21 => Some(128 * MB),
            _ => None,
        }
    }

    /// Look up a manufacturer name from the JEDEC ID.
    #[cfg(feature = "std")]
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        match jep106::JEP106Code::new(0, self.manufacturer_id & 0x7F).get() {
            // Winbond acquired NEXCOM and so the ID 0xEF is commonly used for Winbond memory.
            Some(mfn) if mfn == "NEXCOM" => Some("Winbond/NEXCOM"),
            Some(mfn) => Some(mfn),
            None => None,
        }
    }
}

#[cfg(feature = "std")]
impl std::fmt::Display for FlashID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mfn = match self.manufacturer_name() {
            Some(mfn) => format!(" ({})", mfn),
            None => "".to_string(),
        };
        let size = match self.device_size() {
            Some(size) => format!(", {}MB", size / (1024 * 1024)),
            None => "".to_string(),
        };
        write!(f, "Manufacturer 0x{:02X}{}, Type 0x{:02X}, Capacity 0x{:02X}{}",
               self.manufacturer_id, mfn, self.memory_type, self.capacity_code, size)
    }
}

/// Read the manufacturer ID, memory type and capacity code of the selected flash.
///
/// All-0s or all-1s for the manufacturer usually means no device answered,
/// and is reported as `InvalidManufacturer`.
pub fn read_id<A: FlashAccess>(access: &mut A) -> Result<FlashID> {
    log::debug!("Reading QSPI flash ID");
    let tx: [u8; 4] = [Command::ReadJEDECID.into(), 0, 0, 0];
    let mut rx = [0u8; 4];
    access.exchange(&tx, &mut rx)?;
    log::trace!("Read ID bytes: {:02X?}", &rx[1..]);

    let id = FlashID { manufacturer_id: rx[1], memory_type: rx[2], capacity_code: rx[3] };
    if id.manufacturer_id == 0x00 || id.manufacturer_id == 0xFF {
        log::error!("No device or manufacturer ID found");
        return Err(Error::InvalidManufacturer { id: id.manufacturer_id });
    }

    log::debug!("Read ID: {:?}", id);
    Ok(id)
}
