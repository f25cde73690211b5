// # Packet
//
// ## DPL (Protocol::EsbDpl)
// ```
// Packet: | PREAMBLE | BASE   | PREFIX | LENGTH   | S1          | PAYLOAD     | CRC    |
//         | 1byte    | 4bytes | 1byte  | 6or8 bit | 3bit        | LENGTH byte | 2bytes |
// Memory: |          | BASE   | PREFIX | LENGTH   | PID  | ?ACK | PAYLOAD     |        |
//         | ×        | 4bytes | 1byte  | 1byte    | 2bit | 1bit | LENGTH byte | ×      |
//                     <--  ADDRESS  --> <--              DATA               -->
// ```
//
// ## Fixed length (Protocol::Esb)
// ```
// Packet: | PREAMBLE | BASE   | PREFIX | S0    | S1    | PAYLOAD     | CRC    |
//         | 1byte    | 4bytes | 1byte  | 1byte | 1bit  | STATLEN     | 2bytes |
// Memory: |          | BASE   | PREFIX | PID   | 0     | PAYLOAD     |        |
//         | ×        | 4bytes | 1byte  | 1byte | 1byte | STATLEN     | ×      |
// ```
//
// The ACK bit is the inverse of the nRF24 NO_ACK flag: 1 asks the receiver for an ACK.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{MAX_PAYLOAD_LENGTH, Protocol};
use crate::pid::Pid;

pub(crate) const HEADER_LEN: usize = core::mem::size_of::<Header>();

/// Largest frame in memory: header plus the largest payload.
pub const FRAME_CAPACITY: usize = MAX_PAYLOAD_LENGTH + HEADER_LEN;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
struct Header {
    s0: u8,
    s1: u8,
}

impl Header {
    fn new(protocol: Protocol, pid: Pid, ack: bool, len: u8) -> Self {
        match protocol {
            Protocol::EsbDpl => Self {
                s0: len,
                s1: (pid.inner() << 1) | ack as u8,
            },
            Protocol::Esb => Self {
                s0: pid.inner(),
                s1: 0,
            },
        }
    }

    fn pid(&self, protocol: Protocol) -> Pid {
        match protocol {
            Protocol::EsbDpl => Pid::new(self.s1 >> 1),
            Protocol::Esb => Pid::new(self.s0),
        }
    }
}

/// Frame buffer the engine hands to the radio for transmission.
pub(crate) struct Frame {
    bytes: [u8; FRAME_CAPACITY],
    len: usize,
}

impl Frame {
    pub const fn new() -> Self {
        Self {
            bytes: [0; FRAME_CAPACITY],
            len: HEADER_LEN,
        }
    }

    /// Writes header and payload. `payload` never exceeds [`MAX_PAYLOAD_LENGTH`], payload
    /// capacities are checked at compile time.
    pub fn encode(&mut self, protocol: Protocol, pid: Pid, ack: bool, payload: &[u8]) {
        let len = payload.len().min(MAX_PAYLOAD_LENGTH);
        let header = Header::new(protocol, pid, ack, len as u8);
        self.bytes[..HEADER_LEN].copy_from_slice(header.as_bytes());
        self.bytes[HEADER_LEN..HEADER_LEN + len].copy_from_slice(&payload[..len]);
        self.len = HEADER_LEN + len;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Contents of a received frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FrameView<'a> {
    pub pid: Pid,
    /// Whether the sender asked for an ACK
    pub ack: bool,
    pub payload: &'a [u8],
}

/// Parses a received frame. `static_len` is the payload length for the fixed protocol.
///
/// Returns `None` for frames that are truncated or announce more than `max_len` bytes.
pub(crate) fn decode(
    protocol: Protocol,
    frame: &[u8],
    static_len: usize,
    max_len: usize,
) -> Option<FrameView<'_>> {
    let (header, rest) = Header::ref_from_prefix(frame).ok()?;
    let (len, ack) = match protocol {
        Protocol::EsbDpl => (header.s0 as usize, header.s1 & 1 != 0),
        Protocol::Esb => (static_len, true),
    };
    if len > max_len {
        return None;
    }
    Some(FrameView {
        pid: header.pid(protocol),
        ack,
        payload: rest.get(..len)?,
    })
}
