use embassy_time::Duration;

use crate::addresses::Addresses;

/// 2 Mbps RX wait-for-ack timeout. Smallest reliable value: 160.
const RX_ACK_TIMEOUT_US_2MBPS: u32 = 160;
const RX_ACK_TIMEOUT_US_1MBPS: u32 = 300;
const RX_ACK_TIMEOUT_US_250KBPS: u32 = 300;
const RX_ACK_TIMEOUT_US_1MBPS_BLE: u32 = 300;

/// Latency between the radio matching an address and the event being visible to the timer.
pub(crate) const ADDR_EVENT_LATENCY_US: u32 = 13;

/// Lower bound for [`Config::retransmit_delay`], in microseconds.
pub const RETRANSMIT_DELAY_MIN_US: u64 = 435;

/// Largest payload the dynamic length protocol can carry.
pub const MAX_PAYLOAD_LENGTH: usize = 252;

/// Number of pipes an ESB radio can address.
pub const MAX_PIPE_COUNT: u8 = 8;

const RETRANSMIT_DELAY_US: u64 = 600;
const RETRANSMIT_COUNT: u16 = 3;
const PAYLOAD_LENGTH: u8 = 32;

#[cfg(not(feature = "fast-ru"))]
pub(crate) const TX_RAMP_UP_TIME_US: u32 = 129;

// This is only true if we enable the fast ramp-up time
#[cfg(feature = "fast-ru")]
pub(crate) const TX_RAMP_UP_TIME_US: u32 = 40;

/// Role of the engine, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Primary transmitter
    Ptx,
    /// Primary receiver
    Prx,
}

/// On-air frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    /// Fixed payload length, every frame is acknowledged.
    Esb,
    /// Dynamic payload length, with optional no-ack and ACK payloads.
    EsbDpl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bitrate {
    _2Mbps,
    _1Mbps,
    _250Kbps,
    _1MbpsBle,
    _2MbpsBle,
}

impl Bitrate {
    /// Time the PTX listens for an acknowledgement after a transmission.
    pub fn ack_timeout(self) -> Duration {
        let us = match self {
            Bitrate::_2Mbps | Bitrate::_2MbpsBle => RX_ACK_TIMEOUT_US_2MBPS,
            Bitrate::_1Mbps => RX_ACK_TIMEOUT_US_1MBPS,
            Bitrate::_250Kbps => RX_ACK_TIMEOUT_US_250KBPS,
            Bitrate::_1MbpsBle => RX_ACK_TIMEOUT_US_1MBPS_BLE,
        };
        Duration::from_micros(us as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Crc {
    _16Bit,
    _8Bit,
    Off,
}

/// Output power of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxPower {
    Pos8dBm,
    Pos4dBm,
    Pos3dBm,
    _0dBm,
    Neg4dBm,
    Neg8dBm,
    Neg12dBm,
    Neg16dBm,
    Neg20dBm,
    Neg40dBm,
}

impl TxPower {
    pub fn dbm(self) -> i8 {
        match self {
            TxPower::Pos8dBm => 8,
            TxPower::Pos4dBm => 4,
            TxPower::Pos3dBm => 3,
            TxPower::_0dBm => 0,
            TxPower::Neg4dBm => -4,
            TxPower::Neg8dBm => -8,
            TxPower::Neg12dBm => -12,
            TxPower::Neg16dBm => -16,
            TxPower::Neg20dBm => -20,
            TxPower::Neg40dBm => -40,
        }
    }
}

/// How the PTX starts draining its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxMode {
    /// Transmission starts on enqueue and continues until the queue is empty.
    Auto,
    /// Every payload needs an explicit `start_tx`.
    Manual,
    /// `start_tx` starts draining, after which the queue is emptied automatically.
    ManualStart,
}

/// Protocol configuration
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub role: Role,
    pub protocol: Protocol,
    pub bitrate: Bitrate,
    pub crc: Crc,
    pub tx_power: TxPower,
    pub tx_mode: TxMode,
    /// When false every packet is acknowledged regardless of its no-ack flag.
    pub selective_auto_ack: bool,
    /// Delay between the start of two transmission attempts of the same payload.
    ///
    /// Must be at least [`RETRANSMIT_DELAY_MIN_US`].
    pub retransmit_delay: Duration,
    /// Number of retransmissions after the first attempt.
    pub retransmit_count: u16,
    /// Length of every payload when using [`Protocol::Esb`].
    pub payload_length: u8,
    /// Maximum payload size in bytes that the engine will send or receive.
    ///
    /// Keeping this at 32 bytes or less makes the engine compatible with nRF24L01+ modules.
    pub max_payload_length: u8,
    pub addresses: Addresses,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Ptx,
            protocol: Protocol::EsbDpl,
            bitrate: Bitrate::_2Mbps,
            crc: Crc::_16Bit,
            tx_power: TxPower::_0dBm,
            tx_mode: TxMode::Auto,
            selective_auto_ack: false,
            retransmit_delay: Duration::from_micros(RETRANSMIT_DELAY_US),
            retransmit_count: RETRANSMIT_COUNT,
            payload_length: PAYLOAD_LENGTH,
            max_payload_length: PAYLOAD_LENGTH,
            addresses: Addresses::default(),
        }
    }
}

impl Config {
    pub fn ptx() -> Self {
        Self::default()
    }

    pub fn prx() -> Self {
        Self {
            role: Role::Prx,
            ..Self::default()
        }
    }

    /// Time the PTX keeps its receiver open for an acknowledgement, including the address event
    /// latency.
    pub fn ack_window(&self) -> Duration {
        self.bitrate.ack_timeout() + Duration::from_micros(ADDR_EVENT_LATENCY_US as u64)
    }

    /// Whether a payload with the given no-ack flag expects an acknowledgement.
    pub(crate) fn expects_ack(&self, noack: bool) -> bool {
        match self.protocol {
            Protocol::Esb => true,
            Protocol::EsbDpl => !noack || !self.selective_auto_ack,
        }
    }
}
