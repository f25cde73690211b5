//! The ESB engine: public API and event entry points
//!
//! [`Esb`] owns the queues, the per-pipe tables and the two hardware adapters. It is a plain
//! `&mut self` state machine: the radio and timer interrupts call
//! [`on_radio_event`](Esb::on_radio_event) and [`on_timer_expired`](Esb::on_timer_expired), and
//! every transition runs to completion without waiting. Use [`crate::shared::SharedEsb`] to share
//! one engine between interrupt handlers and tasks.

use embassy_time::Duration;

use crate::addresses::{AddressUpdate, Addresses};
use crate::config::{
    Bitrate, Config, MAX_PAYLOAD_LENGTH, MAX_PIPE_COUNT, Protocol, RETRANSMIT_DELAY_MIN_US, Role,
    TxPower,
};
use crate::event::{Event, EventLatch, PendingEvents};
use crate::fifo::PayloadQueue;
use crate::filter::DuplicateFilter;
use crate::log::{debug, info, trace, warn};
use crate::payload::Payload;
use crate::pid::PidTable;
use crate::radio::packet::Frame;
use crate::radio::{AckTimer, RadioAdapter, RadioEvent, RadioSettings, Received};
use crate::{Error, InvalidArgument};

/// Protocol state, see the PTX and PRX modules for the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    /// PTX: sending a payload that is not acknowledged.
    TransmittingNoAck,
    /// PTX: sending a payload, the radio turns around to receive the ACK afterwards.
    TransmittingWithAck,
    /// PTX: listening for the ACK with the timeout armed.
    AwaitingAck,
    /// PTX: waiting out the retransmit delay before sending the same frame again.
    RetransmitBackoff,
    /// PRX: listening on the enabled pipes.
    Receiving,
    /// PRX: sending the ACK for the last reception.
    SendingAck,
}

/// Enhanced ShockBurst engine.
///
/// `TX` and `RX` are the queue capacities, `P` the largest payload in bytes.
pub struct Esb<R, T, const TX: usize = 8, const RX: usize = 8, const P: usize = 32> {
    pub(crate) radio: R,
    pub(crate) timer: T,
    pub(crate) config: Config,
    initialized: bool,
    pub(crate) state: State,

    pub(crate) tx_queue: PayloadQueue<TX, P>,
    pub(crate) rx_queue: PayloadQueue<RX, P>,
    pub(crate) pids: PidTable,
    pub(crate) filter: DuplicateFilter,
    pub(crate) events: EventLatch,
    handler: Option<fn(Event)>,

    /// Frame currently loaded for transmission, kept intact for retransmissions.
    pub(crate) tx_frame: Frame,
    /// Pipe of the transmission in flight
    pub(crate) tx_pipe: u8,
    pub(crate) retransmits_remaining: u16,
    /// Attempts used so far for the payload in flight
    pub(crate) attempts: u32,
    pub(crate) timer_armed: bool,
    /// Set when the payload in flight was flushed; the PTX stops at its next event.
    pub(crate) abort_pending: bool,
    /// PRX: pipes whose last ACK carried the front ACK payload of that pipe.
    pub(crate) ack_payload_sent: [bool; MAX_PIPE_COUNT as usize],
}

impl<R, T, const TX: usize, const RX: usize, const P: usize> Esb<R, T, TX, RX, P>
where
    R: RadioAdapter,
    T: AckTimer,
{
    /// Creates an engine around the two adapters. Call [`init`](Self::init) before use.
    pub fn new(radio: R, timer: T) -> Self {
        Self {
            radio,
            timer,
            config: Config::default(),
            initialized: false,
            state: State::Idle,
            tx_queue: PayloadQueue::new(),
            rx_queue: PayloadQueue::new(),
            pids: PidTable::default(),
            filter: DuplicateFilter::new(),
            events: EventLatch::new(),
            handler: None,
            tx_frame: Frame::new(),
            tx_pipe: 0,
            retransmits_remaining: 0,
            attempts: 0,
            timer_armed: false,
            abort_pending: false,
            ack_payload_sent: [false; MAX_PIPE_COUNT as usize],
        }
    }

    /// Validates `config` and programs the radio. An initialized engine is disabled first.
    pub fn init(&mut self, config: Config) -> Result<(), Error> {
        Self::validate(&config)?;

        if self.initialized {
            self.disable();
        }

        self.radio.configure(&RadioSettings::from_config(&config));
        self.radio.set_addresses(&config.addresses, AddressUpdate::ALL);
        info!(
            "ESB init: {:?} {:?} {:?}",
            config.role, config.protocol, config.bitrate
        );

        self.config = config;
        self.reset();
        self.initialized = true;
        Ok(())
    }

    fn validate(config: &Config) -> Result<(), Error> {
        if config.retransmit_delay < Duration::from_micros(RETRANSMIT_DELAY_MIN_US) {
            return Err(Error::InvalidArgument(InvalidArgument::RetransmitDelay));
        }
        let limit = P.min(MAX_PAYLOAD_LENGTH);
        if config.max_payload_length == 0 || config.max_payload_length as usize > limit {
            return Err(Error::InvalidArgument(InvalidArgument::PayloadCapacity));
        }
        if config.protocol == Protocol::Esb
            && (config.payload_length == 0 || config.payload_length > config.max_payload_length)
        {
            return Err(Error::InvalidArgument(InvalidArgument::PayloadCapacity));
        }
        config.addresses.validate()
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.tx_queue.clear();
        self.rx_queue.clear();
        self.pids.reset();
        self.filter.reset();
        self.events.clear();
        self.timer_armed = false;
        self.abort_pending = false;
        self.ack_payload_sent = [false; MAX_PIPE_COUNT as usize];
    }

    /// Stops the radio and returns to the uninitialized state, dropping all queued payloads.
    pub fn disable(&mut self) {
        self.radio.disable();
        self.cancel_timer();
        self.reset();
        self.initialized = false;
        debug!("ESB disabled");
    }

    /// Stops the radio while idle, keeping configuration and queues.
    pub fn suspend(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        self.radio.disable();
        Ok(())
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), Error> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), Error> {
        self.ensure_initialized()?;
        if self.state == State::Idle {
            Ok(())
        } else {
            warn!("Rejected while {:?}", self.state);
            Err(Error::Busy)
        }
    }

    // ---------------------------------------------------------------------
    // ------------------------------  QUEUES  -----------------------------
    // ---------------------------------------------------------------------

    /// Queues a payload for transmission and assigns it the next PID of its pipe.
    ///
    /// A PTX in [`TxMode::Auto`](crate::config::TxMode::Auto) starts transmitting right away when
    /// idle. A PRX sends queued payloads along with the ACKs of their pipe.
    pub fn enqueue(&mut self, payload: &Payload<P>) -> Result<(), Error> {
        self.ensure_initialized()?;

        let pipe = payload.pipe;
        if pipe >= self.config.addresses.pipe_count() {
            return Err(Error::InvalidArgument(InvalidArgument::Pipe));
        }
        let limit = match self.config.protocol {
            Protocol::Esb => self.config.payload_length,
            Protocol::EsbDpl => self.config.max_payload_length,
        };
        if payload.is_empty() || payload.len() > limit as usize {
            return Err(Error::InvalidArgument(InvalidArgument::PayloadLength));
        }

        self.tx_queue.push_with(|slot| {
            slot.clone_from(payload);
            slot.pid = self.pids.next(pipe);
            Ok(())
        })?;
        trace!("Queued for pipe {}: {} pending", pipe, self.tx_queue.len());

        if self.config.role == Role::Ptx && self.state == State::Idle && self.auto_start() {
            self.start_tx_transaction();
        }
        Ok(())
    }

    /// Takes the oldest received payload.
    pub fn dequeue_received(&mut self) -> Result<Option<Payload<P>>, Error> {
        self.ensure_initialized()?;
        Ok(self.rx_queue.pop_front())
    }

    /// Drops every queued payload. A payload in flight is abandoned at the next radio or timer
    /// event, without raising an event for it.
    pub fn flush_tx(&mut self) -> Result<(), Error> {
        self.ensure_initialized()?;
        self.tx_queue.clear();
        self.ack_payload_sent = [false; MAX_PIPE_COUNT as usize];
        if matches!(
            self.state,
            State::TransmittingNoAck
                | State::TransmittingWithAck
                | State::AwaitingAck
                | State::RetransmitBackoff
        ) {
            debug!("TX flushed while {:?}, aborting", self.state);
            self.abort_pending = true;
        }
        Ok(())
    }

    /// Drops every received payload and forgets the last packet seen on each pipe.
    pub fn flush_rx(&mut self) -> Result<(), Error> {
        self.ensure_initialized()?;
        self.rx_queue.clear();
        self.filter.reset();
        Ok(())
    }

    pub fn tx_len(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn rx_len(&self) -> usize {
        self.rx_queue.len()
    }

    // ---------------------------------------------------------------------
    // ------------------------------  CONTROL  ----------------------------
    // ---------------------------------------------------------------------

    /// PRX: starts listening. PTX: starts draining the queue.
    pub fn start(&mut self) -> Result<(), Error> {
        match self.config.role {
            Role::Ptx => self.start_tx().map(|_| ()),
            Role::Prx => self.start_rx(),
        }
    }

    /// Stops listening (PRX) or abandons the transmission in flight while keeping it queued
    /// (PTX).
    pub fn stop(&mut self) -> Result<(), Error> {
        self.ensure_initialized()?;
        self.radio.disable();
        self.cancel_timer();
        self.abort_pending = false;
        self.state = State::Idle;
        debug!("Stopped");
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn addresses(&self) -> &Addresses {
        &self.config.addresses
    }

    pub fn rf_channel(&self) -> u8 {
        self.config.addresses.rf_channel()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    // ---------------------------------------------------------------------
    // ---------------------------  CONFIGURATION  -------------------------
    // ---------------------------------------------------------------------

    /// Sets the base address of pipe 0 (`slot` 0) or of pipes 1-7 (`slot` 1).
    pub fn set_base_address(&mut self, slot: u8, address: [u8; 4]) -> Result<(), Error> {
        self.ensure_idle()?;
        let update = self.config.addresses.set_base_address(slot, address)?;
        self.radio.set_addresses(&self.config.addresses, update);
        Ok(())
    }

    /// Sets the prefixes of the first `prefixes.len()` pipes; only those pipes stay in use and
    /// all of them are enabled.
    pub fn set_prefixes(&mut self, prefixes: &[u8]) -> Result<(), Error> {
        self.ensure_idle()?;
        let update = self.config.addresses.set_prefixes(prefixes)?;
        self.radio.set_addresses(&self.config.addresses, update);
        Ok(())
    }

    pub fn update_prefix(&mut self, pipe: u8, prefix: u8) -> Result<(), Error> {
        self.ensure_idle()?;
        let update = self.config.addresses.update_prefix(pipe, prefix)?;
        self.radio.set_addresses(&self.config.addresses, update);
        Ok(())
    }

    /// Selects the pipes a PRX listens on. Transmission is not affected.
    pub fn enable_pipes(&mut self, mask: u8) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.addresses.enable_pipes(mask)
    }

    pub fn set_address_length(&mut self, length: u8) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.addresses.set_address_length(length)?;
        self.reconfigure_radio();
        Ok(())
    }

    pub fn set_channel(&mut self, channel: u8) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.addresses.set_rf_channel(channel)?;
        self.reconfigure_radio();
        Ok(())
    }

    pub fn set_bitrate(&mut self, bitrate: Bitrate) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.bitrate = bitrate;
        self.reconfigure_radio();
        Ok(())
    }

    pub fn set_tx_power(&mut self, tx_power: TxPower) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.tx_power = tx_power;
        self.reconfigure_radio();
        Ok(())
    }

    pub fn set_retransmit_delay(&mut self, delay: Duration) -> Result<(), Error> {
        self.ensure_idle()?;
        if delay < Duration::from_micros(RETRANSMIT_DELAY_MIN_US) {
            return Err(Error::InvalidArgument(InvalidArgument::RetransmitDelay));
        }
        self.config.retransmit_delay = delay;
        Ok(())
    }

    pub fn set_retransmit_count(&mut self, count: u16) -> Result<(), Error> {
        self.ensure_idle()?;
        self.config.retransmit_count = count;
        Ok(())
    }

    /// Makes the next payload queued on `pipe` reuse the PID of the previous one, so a receiver
    /// treats it as a retransmission.
    pub fn reuse_pid(&mut self, pipe: u8) -> Result<(), Error> {
        self.ensure_idle()?;
        if pipe >= MAX_PIPE_COUNT {
            return Err(Error::InvalidArgument(InvalidArgument::Pipe));
        }
        self.pids.reuse(pipe);
        Ok(())
    }

    fn reconfigure_radio(&mut self) {
        self.radio
            .configure(&RadioSettings::from_config(&self.config));
    }

    // ---------------------------------------------------------------------
    // ------------------------------  EVENTS  -----------------------------
    // ---------------------------------------------------------------------

    /// Feeds a radio event into the state machine. Called from the radio interrupt.
    pub fn on_radio_event(&mut self, event: RadioEvent<'_>) {
        if !self.initialized {
            return;
        }
        match event {
            RadioEvent::Ready => trace!("READY in {:?}", self.state),
            RadioEvent::End => {
                // A frame arrived inside the ACK window: whatever the timer does now is stale.
                if self.state == State::AwaitingAck {
                    self.cancel_timer();
                }
            }
            RadioEvent::Disabled(received) => self.on_radio_disabled(received),
        }
    }

    fn on_radio_disabled(&mut self, received: Option<Received<'_>>) {
        match self.state {
            State::TransmittingNoAck => self.on_disabled_tx_noack(),
            State::TransmittingWithAck => self.on_disabled_tx(),
            State::AwaitingAck => self.on_disabled_tx_wait_for_ack(received),
            State::Receiving => self.on_disabled_rx(received),
            State::SendingAck => self.on_disabled_rx_ack(),
            State::Idle | State::RetransmitBackoff => {
                trace!("Ignoring DISABLED in {:?}", self.state)
            }
        }
    }

    /// Feeds the expiry of the [`AckTimer`] into the state machine. Expiries of a timer that was
    /// cancelled or re-armed in the meantime are ignored.
    pub fn on_timer_expired(&mut self) {
        if !self.initialized || !self.timer_armed {
            trace!("Stale timer expiry in {:?}", self.state);
            return;
        }
        self.timer_armed = false;
        match self.state {
            State::AwaitingAck => self.on_ack_timeout(),
            State::RetransmitBackoff => self.on_backoff_elapsed(),
            _ => trace!("Timer expired in {:?}", self.state),
        }
    }

    pub(crate) fn start_timer(&mut self, timeout: Duration) {
        self.timer.start(timeout);
        self.timer_armed = true;
    }

    pub(crate) fn cancel_timer(&mut self) {
        if self.timer_armed {
            self.timer.cancel();
            self.timer_armed = false;
        }
    }

    /// Registers the function [`dispatch_events`](Self::dispatch_events) notifies.
    pub fn on_event(&mut self, handler: fn(Event)) {
        self.handler = Some(handler);
    }

    pub fn has_pending_events(&self) -> bool {
        self.events.is_pending()
    }

    /// Reads and clears the events raised since the last call.
    pub fn take_events(&mut self) -> PendingEvents {
        self.events.take()
    }

    /// Takes the pending events and hands each raised kind once to the registered handler.
    pub fn dispatch_events(&mut self) {
        let pending = self.events.take();
        if let Some(handler) = self.handler {
            pending.dispatch(handler);
        }
    }
}
