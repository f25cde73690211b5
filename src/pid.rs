use crate::config::MAX_PIPE_COUNT;

/// PID (Packet ID) is an ID to identify duplicates of transmitted data, etc.
///
/// This ID is a 2-bit value, which is incremented by 1 in the order in which packets are sent, returning to 00 after 11.
/// By examining this value together with the CRC, the receiver can tell a retransmission from a new packet.
#[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pid(u8);

impl Pid {
    const MAX: u8 = 0b11;
    pub const ZERO: Self = Self(0);

    /// Creates a new `Pid`, keeping only the two low bits of `val`.
    pub fn new(val: u8) -> Self {
        Self(val & Self::MAX)
    }

    pub fn inner(&self) -> u8 {
        self.0
    }

    /// Move to the next PID
    pub fn go_next(&mut self) {
        self.0 = (self.0 + 1) & Self::MAX;
    }

    /// Move back to the previous PID
    pub fn go_prev(&mut self) {
        self.0 = (self.0 + Self::MAX) & Self::MAX;
    }
}

/// Last PID handed out on each pipe for outgoing payloads.
#[derive(Debug, Default)]
pub(crate) struct PidTable {
    pids: [Pid; MAX_PIPE_COUNT as usize],
}

impl PidTable {
    /// Advances the pipe's PID and returns it. Called once per new payload; retransmissions keep
    /// the PID they were queued with.
    pub fn next(&mut self, pipe: u8) -> Pid {
        let pid = &mut self.pids[pipe as usize];
        pid.go_next();
        *pid
    }

    /// Steps the pipe's PID back so the next payload is sent with the current one again.
    pub fn reuse(&mut self, pipe: u8) {
        self.pids[pipe as usize].go_prev();
    }

    pub fn reset(&mut self) {
        self.pids = Default::default();
    }
}
