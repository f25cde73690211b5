//! Hardware boundary of the engine
//!
//! The protocol state machine never touches registers. It drives a [`RadioAdapter`] and an
//! [`AckTimer`], and is driven by [`RadioEvent`]s and timer expiry in return. The nRF52 RADIO
//! implementation lives in [`nrf`] behind the `nrf` feature.

use embassy_time::Duration;

use crate::addresses::{AddressUpdate, Addresses};
use crate::config::{Bitrate, Config, Crc, Protocol, TxPower};

pub(crate) mod packet;

#[cfg(feature = "nrf")]
pub mod nrf;

/// Everything the radio needs to know about the frame format and the air interface.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioSettings {
    pub protocol: Protocol,
    pub bitrate: Bitrate,
    pub crc: Crc,
    pub tx_power: TxPower,
    pub rf_channel: u8,
    /// Base plus prefix length in bytes
    pub address_length: u8,
    pub max_payload_length: u8,
}

impl RadioSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            protocol: config.protocol,
            bitrate: config.bitrate,
            crc: config.crc,
            tx_power: config.tx_power,
            rf_channel: config.addresses.rf_channel(),
            address_length: config.addresses.address_length(),
            max_payload_length: config.max_payload_length,
        }
    }
}

/// A frame the radio finished receiving.
#[derive(Debug, Clone, Copy)]
pub struct Received<'a> {
    /// Header and payload as laid out in memory, see [`packet`](self::packet).
    pub frame: &'a [u8],
    pub crc_ok: bool,
    /// Raw CRC of the frame, only used to recognise retransmissions.
    pub crc: u16,
    /// Pipe whose address matched
    pub pipe: u8,
    /// Sampled signal strength, as `-dBm`
    pub rssi: u8,
}

/// Events raised by the radio, in the order they happen on air.
#[derive(Debug, Clone, Copy)]
pub enum RadioEvent<'a> {
    Ready,
    /// A frame finished on air. While waiting for an ACK this closes the timeout race in favour of
    /// the radio.
    End,
    /// The radio returned to the disabled state. Carries the frame if the finished operation was a
    /// reception that captured one.
    Disabled(Option<Received<'a>>),
}

/// Register-level operations the state machine needs from the radio.
///
/// Every operation only programs the hardware and returns; completion is reported through
/// [`RadioEvent::Disabled`].
pub trait RadioAdapter {
    /// Applies the frame format and air interface settings. Only called while the radio is
    /// disabled.
    fn configure(&mut self, settings: &RadioSettings);

    /// Reprograms the address registers flagged in `update`.
    fn set_addresses(&mut self, addresses: &Addresses, update: AddressUpdate);

    /// Sends `frame` to `pipe`. With `listen_after` the radio turns around into receive on the
    /// same pipe right after the frame is out.
    fn transmit(&mut self, pipe: u8, frame: &[u8], listen_after: bool);

    /// Called once the transmission preceding an ACK window completed; receive the ACK into the
    /// reception buffer.
    fn open_ack_window(&mut self, pipe: u8);

    /// Listens on the pipes in `pipes`, restarting reception if the radio is still active. With
    /// `respond_after` the radio turns around into transmit after a frame, so an ACK can be loaded
    /// with [`respond`](Self::respond).
    ///
    /// `static_len` is the payload length expected by the fixed length protocol.
    fn receive(&mut self, pipes: u8, static_len: u8, respond_after: bool);

    /// Loads the ACK frame for the transmission following the last reception.
    fn respond(&mut self, pipe: u8, frame: &[u8]);

    /// Stops whatever the radio is doing. No event is raised for this.
    fn disable(&mut self);
}

/// One-shot microsecond timer used for the ACK timeout and the retransmit backoff.
pub trait AckTimer {
    /// Arms the timer, replacing any pending expiry.
    fn start(&mut self, timeout: Duration);

    fn cancel(&mut self);
}
