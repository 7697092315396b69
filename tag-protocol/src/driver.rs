// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RFID reader hardware boundary.

use {
    crate::{record, Error},
    consts::{EPC_SIZE, TAG_CAPACITY},
};

/// A tag answering an inventory round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TagPresent {
    pub epc: [u8; EPC_SIZE],
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// The RFID reader module. Offsets address the tag's user memory bank.
pub trait TagDriver {
    type Error: core::fmt::Debug;

    /// Bring up the reader. Called once before the first cycle.
    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Look for a single tag in the field.
    fn inventory(&mut self) -> Result<Option<TagPresent>, Self::Error>;

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryTagError {
    /// The reader module did not answer.
    NoResponse,
    /// The access ends past the user memory bank.
    OutOfRange,
}

impl core::fmt::Display for MemoryTagError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoResponse => write!(f, "reader not responding"),
            Self::OutOfRange => write!(f, "access out of tag memory"),
        }
    }
}

/// A reader with one tag held in memory.
///
/// Used by the host tool to run cycles against tag images stored in files,
/// and by the tests, which can make each step of the reader fail.
#[derive(Debug, Clone)]
pub struct MemoryTag {
    image: [u8; TAG_CAPACITY],
    epc: [u8; EPC_SIZE],
    rssi: i16,
    present: bool,
    fail_init: bool,
    fail_reads: bool,
    fail_writes: bool,
    corrupt_writes: bool,
    writes: usize,
}

impl Default for MemoryTag {
    fn default() -> Self {
        Self {
            image: [0; TAG_CAPACITY],
            epc: [0; EPC_SIZE],
            rssi: -48,
            present: true,
            fail_init: false,
            fail_reads: false,
            fail_writes: false,
            corrupt_writes: false,
            writes: 0,
        }
    }
}

impl MemoryTag {
    /// Blank tag in the field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag whose user memory starts with `image`; the rest is zero.
    pub fn from_image(image: &[u8]) -> Result<Self, Error> {
        if image.len() > TAG_CAPACITY {
            return Err(Error::CapacityExceeded);
        }
        let mut tag = Self::default();
        tag.image[..image.len()].copy_from_slice(image);
        Ok(tag)
    }

    /// Tag holding `content` behind its length word.
    pub fn with_content(content: &[u8]) -> Result<Self, Error> {
        Self::from_image(&record::frame(content)?)
    }

    pub fn with_epc(mut self, epc: [u8; EPC_SIZE]) -> Self {
        self.epc = epc;
        self
    }

    /// Signal strength reported by inventory, in dBm.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn image(&self) -> &[u8; TAG_CAPACITY] {
        &self.image
    }

    /// Content currently stored behind the length word.
    pub fn content(&self) -> Result<&[u8], Error> {
        record::unframe(&self.image)
    }

    /// Number of successful block writes.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn fail_init(&mut self, fail: bool) {
        self.fail_init = fail;
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Writes report success but store the data with the last byte flipped.
    pub fn corrupt_writes(&mut self, corrupt: bool) {
        self.corrupt_writes = corrupt;
    }

    fn range(offset: usize, len: usize) -> Result<core::ops::Range<usize>, MemoryTagError> {
        let end = offset.checked_add(len).ok_or(MemoryTagError::OutOfRange)?;
        if end > TAG_CAPACITY {
            return Err(MemoryTagError::OutOfRange);
        }
        Ok(offset..end)
    }
}

impl TagDriver for MemoryTag {
    type Error = MemoryTagError;

    fn begin(&mut self) -> Result<(), Self::Error> {
        if self.fail_init {
            return Err(MemoryTagError::NoResponse);
        }
        Ok(())
    }

    fn inventory(&mut self) -> Result<Option<TagPresent>, Self::Error> {
        Ok(self.present.then_some(TagPresent {
            epc: self.epc,
            rssi: self.rssi,
        }))
    }

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads {
            return Err(MemoryTagError::NoResponse);
        }
        let range = Self::range(offset, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemoryTagError::NoResponse);
        }
        let range = Self::range(offset, data.len())?;
        let end = range.end;
        self.image[range].copy_from_slice(data);
        if self.corrupt_writes && !data.is_empty() {
            self.image[end - 1] ^= 0x01;
        }
        self.writes += 1;
        Ok(())
    }
}
