use crate::config::MAX_PAYLOAD_LENGTH;
use crate::pid::Pid;
use crate::{Error, InvalidArgument};

/// A payload travelling through the engine, with room for up to `P` data bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload<const P: usize> {
    pub(crate) pipe: u8,
    pub(crate) pid: Pid,
    pub(crate) noack: bool,
    pub(crate) rssi: u8,
    len: u8,
    data: [u8; P],
}

impl<const P: usize> Payload<P> {
    /// Creates a payload for `pipe` that requests an acknowledgement.
    pub fn new(pipe: u8, data: &[u8]) -> Result<Self, Error> {
        let mut payload = Self::empty();
        payload.pipe = pipe;
        payload.set_data(data)?;
        Ok(payload)
    }

    /// Creates a payload for `pipe` that asks the receiver not to acknowledge it.
    ///
    /// Only honoured with the dynamic length protocol and selective auto ack enabled.
    pub fn new_noack(pipe: u8, data: &[u8]) -> Result<Self, Error> {
        let mut payload = Self::new(pipe, data)?;
        payload.noack = true;
        Ok(payload)
    }

    pub(crate) const fn empty() -> Self {
        Self {
            pipe: 0,
            pid: Pid::ZERO,
            noack: false,
            rssi: 0,
            len: 0,
            data: [0; P],
        }
    }

    pub(crate) fn set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        const {
            assert!(
                P <= MAX_PAYLOAD_LENGTH,
                "payload capacity must not exceed 252 bytes"
            )
        }
        if data.len() > P {
            return Err(Error::InvalidArgument(InvalidArgument::PayloadLength));
        }
        self.data[..data.len()].copy_from_slice(data);
        self.len = data.len() as u8;
        Ok(())
    }

    pub fn pipe(&self) -> u8 {
        self.pipe
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn noack(&self) -> bool {
        self.noack
    }

    /// Signal strength sampled while receiving, as `-dBm`. Zero for outgoing payloads.
    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const P: usize> core::fmt::Debug for Payload<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Payload")
            .field("pipe", &self.pipe)
            .field("pid", &self.pid)
            .field("noack", &self.noack)
            .field("rssi", &self.rssi)
            .field("data", &self.data())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl<const P: usize> defmt::Format for Payload<P> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Payload {{ pipe: {}, pid: {}, noack: {}, data: {:02x} }}",
            self.pipe,
            self.pid,
            self.noack,
            self.data()
        )
    }
}
