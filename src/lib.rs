#![cfg_attr(not(test), no_std)]
//! Enhanced ShockBurst link layer
//!
//! The protocol engine ([`Esb`]) is hardware independent: it drives a [`RadioAdapter`] and an
//! [`AckTimer`] and is fed their events. With the `nrf` feature, [`radio::nrf`] provides both for
//! the nRF52 RADIO peripheral.

pub mod addresses;
pub mod config;
mod engine;
pub mod event;
mod fifo;
mod filter;
mod log;
mod payload;
mod pid;
mod prx;
mod ptx;
pub mod radio;
pub mod shared;

#[cfg(test)]
mod testing;

pub use addresses::Addresses;
pub use config::Config;
pub use engine::{Esb, State};
pub use event::{Event, PendingEvents};
pub use fifo::PayloadQueue;
pub use payload::Payload;
pub use pid::Pid;
pub use radio::{AckTimer, RadioAdapter, RadioEvent, RadioSettings, Received};
pub use shared::SharedEsb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The engine was not initialized, or was disabled since.
    NotInitialized,
    /// The operation needs the engine to be idle.
    Busy,
    QueueFull,
    InvalidArgument(InvalidArgument),
}

/// The parameter that was out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvalidArgument {
    Pipe,
    PipeMask,
    PayloadLength,
    AddressLength,
    PrefixCount,
    Channel,
    RetransmitDelay,
    /// Payload length settings exceed what the engine was built for.
    PayloadCapacity,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NotInitialized => f.write_str("not initialized"),
            Error::Busy => f.write_str("busy"),
            Error::QueueFull => f.write_str("queue full"),
            Error::InvalidArgument(arg) => write!(f, "invalid argument: {:?}", arg),
        }
    }
}
