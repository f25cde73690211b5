//! Engine shared between interrupt handlers and tasks
//!
//! Every access runs inside one critical section. Interrupt handlers feed radio and timer events
//! in, tasks use the queue API, and [`SharedEsb::wait_events`] lets a task sleep until the engine
//! has something to report. Event handlers always run after the critical section is released.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::Error;
use crate::engine::Esb;
use crate::event::{Event, PendingEvents};
use crate::payload::Payload;
use crate::radio::{AckTimer, RadioAdapter, RadioEvent};

pub struct SharedEsb<R, T, const TX: usize = 8, const RX: usize = 8, const P: usize = 32> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Esb<R, T, TX, RX, P>>>,
    events: Signal<CriticalSectionRawMutex, ()>,
}

impl<R, T, const TX: usize, const RX: usize, const P: usize> SharedEsb<R, T, TX, RX, P>
where
    R: RadioAdapter,
    T: AckTimer,
{
    pub const fn new(esb: Esb<R, T, TX, RX, P>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(esb)),
            events: Signal::new(),
        }
    }

    /// Runs `f` on the engine inside a critical section and wakes [`wait_events`](Self::wait_events)
    /// if it left events behind.
    pub fn lock<U>(&self, f: impl FnOnce(&mut Esb<R, T, TX, RX, P>) -> U) -> U {
        let (result, pending) = self.inner.lock(|esb| {
            let mut esb = esb.borrow_mut();
            let result = f(&mut esb);
            (result, esb.has_pending_events())
        });
        if pending {
            self.events.signal(());
        }
        result
    }

    /// For the radio interrupt handler.
    pub fn on_radio_event(&self, event: RadioEvent<'_>) {
        self.lock(|esb| esb.on_radio_event(event))
    }

    /// For the timer interrupt handler.
    pub fn on_timer_expired(&self) {
        self.lock(|esb| esb.on_timer_expired())
    }

    pub fn enqueue(&self, payload: &Payload<P>) -> Result<(), Error> {
        self.lock(|esb| esb.enqueue(payload))
    }

    pub fn dequeue_received(&self) -> Result<Option<Payload<P>>, Error> {
        self.lock(|esb| esb.dequeue_received())
    }

    /// Waits until at least one event was raised, then takes all pending events.
    pub async fn wait_events(&self) -> PendingEvents {
        loop {
            let pending = self.lock(|esb| esb.take_events());
            if !pending.is_empty() {
                return pending;
            }
            self.events.wait().await;
        }
    }

    /// Takes the pending events and calls `handler` once per raised kind, outside the critical
    /// section.
    pub fn dispatch(&self, handler: impl FnMut(Event)) {
        let pending = self.lock(|esb| esb.take_events());
        pending.dispatch(handler);
    }
}
