use crate::config::MAX_PIPE_COUNT;
use crate::{Error, InvalidArgument};

/// Addresses used for communication.
///
/// ESB uses up to eight pipes to address communication, each pipe has an unique address which is
/// composed by the base address and the prefix. Pipe 0 has an unique base and prefix, while the
/// other pipes share a base address but have different prefixes.
///
/// Default values:
///
/// | Field          | Default Value                                    |
/// | :---           | :---                                             |
/// | base0          | [0xE7, 0xE7, 0xE7, 0xE7]                         |
/// | base1          | [0xC2, 0xC2, 0xC2, 0xC2]                         |
/// | prefixes       | [0xE7, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8] |
/// | address_length | 5                                                |
/// | pipe_count     | 8                                                |
/// | enabled_pipes  | 0xFF                                             |
/// | rf_channel     | 2                                                |
///
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Addresses {
    /// Base address for pipe 0
    pub(crate) base0: [u8; 4],
    /// Base address for pipe 1-7
    pub(crate) base1: [u8; 4],
    /// Prefixes for pipes 0-7, in order
    pub(crate) prefixes: [u8; 8],
    /// Number of pipes in use
    pub(crate) pipe_count: u8,
    /// Base plus prefix length in bytes, 3 to 5
    pub(crate) address_length: u8,
    /// Bit mask of the pipes the radio listens on while receiving, the LSb is pipe zero
    pub(crate) enabled_pipes: u8,
    /// Channel to be used by the radio hardware (must be between 0 and 100)
    pub(crate) rf_channel: u8,
}

/// Which address registers changed since the radio was last programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressUpdate(u8);

impl AddressUpdate {
    pub const BASE0: Self = Self(1 << 0);
    pub const BASE1: Self = Self(1 << 1);
    pub const PREFIXES: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Full on-air address of a pipe, prefix first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeAddress {
    bytes: [u8; 5],
    len: u8,
}

impl PipeAddress {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn prefix(&self) -> u8 {
        self.bytes[0]
    }
}

pub const MAX_RF_CHANNEL: u8 = 100;

impl Addresses {
    /// Creates a new instance of `Addresses`
    ///
    /// * `base0` - Base address for pipe 0.
    /// * `base1` - Base address for pipe 1-7.
    /// * `prefixes` - Prefixes for pipes 0-7, in order.
    /// * `rf_channel` - Channel to be used by the radio hardware (must be between 0 and 100).
    pub fn new(
        base0: [u8; 4],
        base1: [u8; 4],
        prefixes: [u8; 8],
        rf_channel: u8,
    ) -> Result<Self, Error> {
        if rf_channel > MAX_RF_CHANNEL {
            return Err(Error::InvalidArgument(InvalidArgument::Channel));
        }
        Ok(Self {
            base0,
            base1,
            prefixes,
            rf_channel,
            ..Self::default()
        })
    }

    pub fn base_address(&self, slot: u8) -> Result<[u8; 4], Error> {
        match slot {
            0 => Ok(self.base0),
            1 => Ok(self.base1),
            _ => Err(Error::InvalidArgument(InvalidArgument::Pipe)),
        }
    }

    pub fn prefixes(&self) -> &[u8] {
        &self.prefixes[..self.pipe_count as usize]
    }

    pub fn pipe_count(&self) -> u8 {
        self.pipe_count
    }

    pub fn address_length(&self) -> u8 {
        self.address_length
    }

    pub fn enabled_pipes(&self) -> u8 {
        self.enabled_pipes
    }

    pub fn rf_channel(&self) -> u8 {
        self.rf_channel
    }

    fn pipe_mask(&self) -> u8 {
        (0xFF_u16 >> (8 - self.pipe_count as u16)) as u8
    }

    pub(crate) fn set_base_address(&mut self, slot: u8, address: [u8; 4]) -> Result<AddressUpdate, Error> {
        match slot {
            0 => {
                self.base0 = address;
                Ok(AddressUpdate::BASE0)
            }
            1 => {
                self.base1 = address;
                Ok(AddressUpdate::BASE1)
            }
            _ => Err(Error::InvalidArgument(InvalidArgument::Pipe)),
        }
    }

    /// Replaces the first `prefixes.len()` prefixes, and uses (and enables) exactly that many
    /// pipes.
    pub(crate) fn set_prefixes(&mut self, prefixes: &[u8]) -> Result<AddressUpdate, Error> {
        if prefixes.is_empty() || prefixes.len() > MAX_PIPE_COUNT as usize {
            return Err(Error::InvalidArgument(InvalidArgument::PrefixCount));
        }
        self.prefixes[..prefixes.len()].copy_from_slice(prefixes);
        self.pipe_count = prefixes.len() as u8;
        self.enabled_pipes = self.pipe_mask();
        Ok(AddressUpdate::PREFIXES)
    }

    pub(crate) fn update_prefix(&mut self, pipe: u8, prefix: u8) -> Result<AddressUpdate, Error> {
        if pipe >= self.pipe_count {
            return Err(Error::InvalidArgument(InvalidArgument::Pipe));
        }
        self.prefixes[pipe as usize] = prefix;
        Ok(AddressUpdate::PREFIXES)
    }

    pub(crate) fn enable_pipes(&mut self, mask: u8) -> Result<(), Error> {
        if mask & !self.pipe_mask() != 0 {
            return Err(Error::InvalidArgument(InvalidArgument::PipeMask));
        }
        self.enabled_pipes = mask;
        Ok(())
    }

    pub(crate) fn set_address_length(&mut self, length: u8) -> Result<(), Error> {
        if !(3..=5).contains(&length) {
            return Err(Error::InvalidArgument(InvalidArgument::AddressLength));
        }
        self.address_length = length;
        Ok(())
    }

    pub(crate) fn set_rf_channel(&mut self, channel: u8) -> Result<(), Error> {
        if channel > MAX_RF_CHANNEL {
            return Err(Error::InvalidArgument(InvalidArgument::Channel));
        }
        self.rf_channel = channel;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !(3..=5).contains(&self.address_length) {
            return Err(Error::InvalidArgument(InvalidArgument::AddressLength));
        }
        if self.pipe_count == 0 || self.pipe_count > MAX_PIPE_COUNT {
            return Err(Error::InvalidArgument(InvalidArgument::PrefixCount));
        }
        if self.enabled_pipes & !self.pipe_mask() != 0 {
            return Err(Error::InvalidArgument(InvalidArgument::PipeMask));
        }
        if self.rf_channel > MAX_RF_CHANNEL {
            return Err(Error::InvalidArgument(InvalidArgument::Channel));
        }
        Ok(())
    }

    pub fn is_enabled(&self, pipe: u8) -> bool {
        pipe < self.pipe_count && self.enabled_pipes & (1 << pipe) != 0
    }

    /// On-air address of `pipe`: its prefix followed by the leading `address_length - 1` bytes
    /// of the base address the pipe uses.
    pub fn resolve(&self, pipe: u8) -> Result<PipeAddress, Error> {
        if pipe >= self.pipe_count {
            return Err(Error::InvalidArgument(InvalidArgument::Pipe));
        }
        let base = if pipe == 0 { &self.base0 } else { &self.base1 };
        let base_len = self.address_length as usize - 1;

        let mut bytes = [0; 5];
        bytes[0] = self.prefixes[pipe as usize];
        bytes[1..1 + base_len].copy_from_slice(&base[..base_len]);
        Ok(PipeAddress {
            bytes,
            len: self.address_length,
        })
    }
}

impl Default for Addresses {
    fn default() -> Self {
        Self {
            base0: [0xE7, 0xE7, 0xE7, 0xE7],
            base1: [0xC2, 0xC2, 0xC2, 0xC2],
            prefixes: [0xE7, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8],
            pipe_count: MAX_PIPE_COUNT,
            address_length: 5,
            enabled_pipes: 0xFF,
            rf_channel: 2,
        }
    }
}

/// Converts a base address from nRF24L byte order to the nRF5 BASE register layout.
#[inline]
pub fn address_conversion(value: u32) -> u32 {
    value.reverse_bits()
}

/// Reverses the bit order within each byte of `value`.
#[inline]
pub fn bytewise_bit_swap(value: u32) -> u32 {
    value.reverse_bits().swap_bytes()
}
