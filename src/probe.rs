// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use crate::{AccessMode, Error, FlashAccess, FlashSession, ReadConfig, Result};

const HEADER_WORDS: usize = 10;

/// Start of a boot image, used to tell whether a read command returns good data.
///
/// The image begins with an ARM vector table whose handlers branch to
/// themselves, followed by the width detection word and the image identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootHeader {
    words: [u32; HEADER_WORDS],
}

impl BootHeader {
    /// Number of bytes read from the start of flash to check the header.
    pub const LEN: usize = HEADER_WORDS * 4;

    const BRANCH_TO_SELF: u32 = 0xEAFF_FFFE;
    const WIDTH_DETECTION: u32 = 0xAA99_5566;
    const IMAGE_ID: u32 = 0x584C_4E58;

    /// Parse the first `LEN` bytes of flash as little-endian words.
    pub fn from_bytes(data: &[u8; BootHeader::LEN]) -> Self {
        let mut words = [0u32; HEADER_WORDS];
        for (word, bytes) in words.iter_mut().zip(data.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        BootHeader { words }
    }

    /// True if the reserved vectors, width detection word and image ID all match.
    pub fn is_valid(&self) -> bool {
        self.words[4..8].iter().all(|&w| w == Self::BRANCH_TO_SELF)
            && self.words[8] == Self::WIDTH_DETECTION
            && self.words[9] == Self::IMAGE_ID
    }
}

impl<'a, A: FlashAccess> FlashSession<'a, A> {
    /// Find a read command which returns a valid boot header.
    ///
    /// Each candidate in turn is used to read the start of flash. The first
    /// one which gives a valid header is kept and returned. If none do, the
    /// previous read configuration is restored and `Ok(None)` is returned.
    ///
    /// Transfer errors abort the probe. Only manual reads can be probed,
    /// since linear mode reads use the controller's own command.
    pub fn probe_read_config(&mut self, candidates: &[ReadConfig]) -> Result<Option<ReadConfig>> {
        if self.access_mode() == AccessMode::Linear {
            log::error!("Read commands can only be probed in manual access mode");
            return Err(Error::InvalidConfiguration("read probe needs manual access"));
        }

        let previous = self.read_config();
        for &candidate in candidates {
            self.set_read_config(candidate)?;
            let mut data = [0u8; BootHeader::LEN];
            if let Err(e) = self.access(0, &mut data) {
                self.set_read_config(previous)?;
                return Err(e);
            }
            let header = BootHeader::from_bytes(&data);
            log::debug!("Probe {:?}/{} dummy: header {:08X?}",
                        candidate.command, candidate.dummy_bytes, header.words);
            if header.is_valid() {
                log::debug!("Boot header found using {:?}", candidate.command);
                return Ok(Some(candidate));
            }
            log::warn!("No boot header using {:?} with {} dummy bytes",
                       candidate.command, candidate.dummy_bytes);
        }

        self.set_read_config(previous)?;
        Ok(None)
    }
}
