use crate::config::MAX_PIPE_COUNT;
use crate::pid::Pid;

/// Last accepted (PID, CRC) per pipe, used to recognise a retransmission of a packet that was
/// already delivered but whose ACK the sender missed.
#[derive(Debug, Default)]
pub(crate) struct DuplicateFilter {
    last: [Option<(Pid, u16)>; MAX_PIPE_COUNT as usize],
}

impl DuplicateFilter {
    pub const fn new() -> Self {
        Self {
            last: [None; MAX_PIPE_COUNT as usize],
        }
    }

    /// `true` iff `(pid, crc)` is the pair last recorded on `pipe`. Never true before the first
    /// reception on a pipe.
    pub fn is_duplicate(&self, pipe: u8, pid: Pid, crc: u16) -> bool {
        self.last
            .get(pipe as usize)
            .is_some_and(|last| *last == Some((pid, crc)))
    }

    pub fn record(&mut self, pipe: u8, pid: Pid, crc: u16) {
        if let Some(last) = self.last.get_mut(pipe as usize) {
            *last = Some((pid, crc));
        }
    }

    pub fn reset(&mut self) {
        self.last = [None; MAX_PIPE_COUNT as usize];
    }
}
