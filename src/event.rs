/// Notification delivered to the application after the engine changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A payload was delivered. For a PRX this means an ACK payload reached the PTX.
    TxSuccess { attempts: u32 },
    /// A payload was abandoned after all retransmissions went unacknowledged.
    TxFailed { attempts: u32 },
    /// At least one payload is waiting in the receive queue.
    RxReceived,
}

/// Set of event kinds raised since the last dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventFlags(u8);

impl EventFlags {
    pub const TX_SUCCESS: Self = Self(1 << 0);
    pub const TX_FAILED: Self = Self(1 << 1);
    pub const RX_RECEIVED: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Events taken out of the engine in one step, ready to be handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingEvents {
    pub(crate) flags: EventFlags,
    /// Attempts used by the last delivered payload.
    pub(crate) success_attempts: u32,
    /// Attempts used by the last abandoned payload.
    pub(crate) failed_attempts: u32,
}

impl PendingEvents {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// Events in delivery order: success, failure, then reception.
    pub fn iter(&self) -> impl Iterator<Item = Event> {
        let flags = self.flags;
        [
            (
                EventFlags::TX_SUCCESS,
                Event::TxSuccess {
                    attempts: self.success_attempts,
                },
            ),
            (
                EventFlags::TX_FAILED,
                Event::TxFailed {
                    attempts: self.failed_attempts,
                },
            ),
            (EventFlags::RX_RECEIVED, Event::RxReceived),
        ]
        .into_iter()
        .filter(move |(flag, _)| flags.contains(*flag))
        .map(|(_, event)| event)
    }

    /// Calls `handler` once per raised event kind.
    pub fn dispatch(self, mut handler: impl FnMut(Event)) {
        for event in self.iter() {
            handler(event);
        }
    }
}

/// Accumulates events raised in interrupt context until they are dispatched.
#[derive(Debug, Default)]
pub(crate) struct EventLatch {
    pending: PendingEvents,
}

impl EventLatch {
    pub const fn new() -> Self {
        Self {
            pending: PendingEvents {
                flags: EventFlags::empty(),
                success_attempts: 0,
                failed_attempts: 0,
            },
        }
    }

    pub fn raise(&mut self, flag: EventFlags) {
        self.pending.flags.insert(flag);
    }

    pub fn raise_tx_success(&mut self, attempts: u32) {
        self.pending.success_attempts = attempts;
        self.pending.flags.insert(EventFlags::TX_SUCCESS);
    }

    pub fn raise_tx_failed(&mut self, attempts: u32) {
        self.pending.failed_attempts = attempts;
        self.pending.flags.insert(EventFlags::TX_FAILED);
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Reads and clears the raised events.
    pub fn take(&mut self) -> PendingEvents {
        core::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.pending = PendingEvents::default();
    }
}
