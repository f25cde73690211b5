//! PTX side of the state machine
//!
//! The front entry of the TX queue stays queued until its outcome is known: it is popped on
//! success or after the last retransmission, never re-pushed. Retransmissions resend the frame
//! built for the first attempt, so the PID does not change.

use embassy_time::Duration;

use crate::config::{Protocol, Role, TX_RAMP_UP_TIME_US, TxMode};
use crate::engine::{Esb, State};
use crate::event::EventFlags;
use crate::log::{debug, trace, warn};
use crate::radio::packet::decode;
use crate::radio::{AckTimer, RadioAdapter, Received};
use crate::Error;

impl<R, T, const TX: usize, const RX: usize, const P: usize> Esb<R, T, TX, RX, P>
where
    R: RadioAdapter,
    T: AckTimer,
{
    /// Starts transmitting the queue.
    ///
    /// Returns `Ok(false)` if there is nothing to send, or if the engine is a PRX, whose queued
    /// payloads only travel with ACKs.
    pub fn start_tx(&mut self) -> Result<bool, Error> {
        self.ensure_idle()?;
        if self.config.role != Role::Ptx || self.tx_queue.is_empty() {
            return Ok(false);
        }
        self.start_tx_transaction();
        Ok(true)
    }

    pub(crate) fn auto_start(&self) -> bool {
        self.config.tx_mode == TxMode::Auto
    }

    /// Loads the front entry and hands it to the radio. The queue must not be empty.
    pub(crate) fn start_tx_transaction(&mut self) {
        let Some(payload) = self.tx_queue.peek_front() else {
            self.state = State::Idle;
            return;
        };

        let ack = self.config.expects_ack(payload.noack);
        self.tx_frame
            .encode(self.config.protocol, payload.pid, !payload.noack, payload.data());
        self.tx_pipe = payload.pipe;
        self.retransmits_remaining = self.config.retransmit_count;
        self.attempts = 1;

        self.state = if ack {
            State::TransmittingWithAck
        } else {
            State::TransmittingNoAck
        };
        debug!(
            "TX pipe {} pid {} ({} bytes, ack: {})",
            payload.pipe,
            payload.pid.inner(),
            payload.len(),
            ack
        );
        self.radio.transmit(self.tx_pipe, self.tx_frame.as_bytes(), ack);
    }

    /// Sends the loaded frame again.
    fn retransmit(&mut self) {
        debug!(
            "Retransmit on pipe {}, attempt {}",
            self.tx_pipe, self.attempts
        );
        self.state = State::TransmittingWithAck;
        self.radio.transmit(self.tx_pipe, self.tx_frame.as_bytes(), true);
    }

    pub(crate) fn on_disabled_tx_noack(&mut self) {
        if self.abort_pending {
            return self.finish_abort();
        }
        self.tx_queue.discard_front();
        self.events.raise_tx_success(self.attempts);
        self.next_or_idle();
    }

    /// The frame is out and the radio turned around to receive.
    pub(crate) fn on_disabled_tx(&mut self) {
        if self.abort_pending {
            return self.finish_abort();
        }
        self.radio.open_ack_window(self.tx_pipe);
        self.start_timer(self.config.ack_window());
        self.state = State::AwaitingAck;
    }

    pub(crate) fn on_disabled_tx_wait_for_ack(&mut self, received: Option<Received<'_>>) {
        self.cancel_timer();
        if self.abort_pending {
            return self.finish_abort();
        }
        match received {
            Some(frame) if frame.crc_ok => self.ack_received(frame),
            _ => {
                trace!("No valid ACK on pipe {}", self.tx_pipe);
                self.retransmit_or_fail(self.config.ack_window());
            }
        }
    }

    fn ack_received(&mut self, frame: Received<'_>) {
        if self.config.protocol == Protocol::EsbDpl {
            let Some(view) = decode(
                Protocol::EsbDpl,
                frame.frame,
                0,
                self.config.max_payload_length as usize,
            ) else {
                warn!("Malformed ACK on pipe {}", frame.pipe);
                return self.retransmit_or_fail(self.config.ack_window());
            };

            if !view.payload.is_empty() {
                let pushed = self.rx_queue.push_with(|slot| {
                    slot.pipe = frame.pipe;
                    slot.pid = view.pid;
                    slot.noack = !view.ack;
                    slot.rssi = frame.rssi;
                    slot.set_data(view.payload)
                });
                match pushed {
                    Ok(()) => self.events.raise(EventFlags::RX_RECEIVED),
                    Err(e) => warn!("ACK payload dropped: {:?}", e),
                }
            }
        }

        debug!("ACK on pipe {} after {} attempts", self.tx_pipe, self.attempts);
        self.tx_queue.discard_front();
        self.events.raise_tx_success(self.attempts);
        self.next_or_idle();
    }

    pub(crate) fn on_ack_timeout(&mut self) {
        self.radio.disable();
        if self.abort_pending {
            return self.finish_abort();
        }
        trace!("ACK timeout on pipe {}", self.tx_pipe);
        self.retransmit_or_fail(self.config.ack_window());
    }

    pub(crate) fn on_backoff_elapsed(&mut self) {
        if self.abort_pending {
            return self.finish_abort();
        }
        self.retransmit();
    }

    /// `elapsed` is the time already spent since the end of the last transmission.
    fn retransmit_or_fail(&mut self, elapsed: Duration) {
        if self.retransmits_remaining == 0 {
            warn!(
                "TX failed on pipe {} after {} attempts",
                self.tx_pipe, self.attempts
            );
            self.tx_queue.discard_front();
            self.events.raise_tx_failed(self.attempts);
            return self.next_or_idle();
        }

        self.retransmits_remaining -= 1;
        self.attempts += 1;

        let backoff = self
            .config
            .retransmit_delay
            .as_micros()
            .saturating_sub(TX_RAMP_UP_TIME_US as u64 + elapsed.as_micros());
        if backoff == 0 {
            self.retransmit();
        } else {
            self.state = State::RetransmitBackoff;
            self.start_timer(Duration::from_micros(backoff));
        }
    }

    fn finish_abort(&mut self) {
        debug!("In-flight payload abandoned");
        self.radio.disable();
        self.cancel_timer();
        self.abort_pending = false;
        self.next_or_idle();
    }

    fn next_or_idle(&mut self) {
        if self.config.tx_mode != TxMode::Manual && !self.tx_queue.is_empty() {
            self.start_tx_transaction();
        } else {
            self.state = State::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::Event;
    use crate::payload::Payload;
    use crate::radio::RadioEvent;
    use crate::testing::{MockRadio, MockTimer, RadioCall, TestEsb, ack_frame, payload};

    fn ptx_with(config: Config) -> TestEsb {
        let mut esb = TestEsb::new(MockRadio::default(), MockTimer::default());
        esb.init(config).unwrap();
        esb.radio_mut().calls.clear();
        esb
    }

    fn ptx() -> TestEsb {
        ptx_with(Config::ptx())
    }

    fn events(esb: &mut TestEsb) -> Vec<Event> {
        esb.take_events().iter().collect()
    }

    /// Transmission done, the radio is listening for the ACK.
    fn sent(esb: &mut TestEsb) {
        esb.on_radio_event(RadioEvent::Ready);
        esb.on_radio_event(RadioEvent::Disabled(None));
        assert_eq!(esb.state(), State::AwaitingAck);
    }

    fn ack(esb: &mut TestEsb, frame: &[u8]) {
        esb.on_radio_event(RadioEvent::End);
        esb.on_radio_event(RadioEvent::Disabled(Some(Received {
            frame,
            crc_ok: true,
            crc: 0x1234,
            pipe: 0,
            rssi: 50,
        })));
    }

    #[test]
    fn round_trip() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"hello")).unwrap();

        assert_eq!(
            esb.radio().calls[0],
            RadioCall::Transmit {
                pipe: 0,
                frame: vec![5, 0b011, b'h', b'e', b'l', b'l', b'o'],
                listen_after: true,
            }
        );
        assert_eq!(esb.state(), State::TransmittingWithAck);

        sent(&mut esb);
        assert_eq!(esb.radio().calls[1], RadioCall::OpenAckWindow(0));
        assert_eq!(esb.timer().armed, Some(Config::ptx().ack_window()));

        ack(&mut esb, &ack_frame(0, &[]));
        assert_eq!(events(&mut esb), [Event::TxSuccess { attempts: 1 }]);
        assert_eq!(esb.tx_len(), 0);
        assert_eq!(esb.rx_len(), 0);
        assert!(esb.is_idle());
        assert_eq!(esb.timer().armed, None);
    }

    #[test]
    fn bounded_retry_fails_after_count_plus_one_attempts() {
        let mut config = Config::ptx();
        config.retransmit_count = 2;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"x")).unwrap();

        for _ in 0..3 {
            time_out(&mut esb);
        }

        assert_eq!(events(&mut esb), [Event::TxFailed { attempts: 3 }]);
        assert_eq!(esb.tx_len(), 0);
        assert!(esb.is_idle());
        let transmits = esb
            .radio()
            .calls
            .iter()
            .filter(|c| matches!(c, RadioCall::Transmit { .. }))
            .count();
        assert_eq!(transmits, 3);
    }

    fn time_out(esb: &mut TestEsb) {
        sent(esb);
        esb.on_timer_expired();
        if esb.state() == State::RetransmitBackoff {
            esb.on_timer_expired();
        }
    }

    #[test]
    fn failure_and_success_in_one_cycle_report_own_attempts() {
        let mut config = Config::ptx();
        config.retransmit_count = 2;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"a")).unwrap();
        esb.enqueue(&payload(0, b"b")).unwrap();

        for _ in 0..3 {
            time_out(&mut esb);
        }
        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));

        assert_eq!(
            events(&mut esb),
            [
                Event::TxSuccess { attempts: 1 },
                Event::TxFailed { attempts: 3 }
            ]
        );
        assert!(esb.is_idle());
    }

    #[test]
    fn largest_retransmit_count_reports_every_attempt() {
        let mut config = Config::ptx();
        config.retransmit_count = u16::MAX;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"x")).unwrap();

        while !esb.is_idle() {
            time_out(&mut esb);
            esb.radio_mut().calls.clear();
        }

        assert_eq!(
            events(&mut esb),
            [Event::TxFailed {
                attempts: u16::MAX as u32 + 1
            }]
        );
        assert_eq!(esb.tx_len(), 0);
    }

    #[test]
    fn retransmission_keeps_frame_and_pid() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"abc")).unwrap();
        let first = esb.radio().calls[0].clone();

        sent(&mut esb);
        esb.on_timer_expired();
        assert_eq!(esb.state(), State::RetransmitBackoff);
        // 600 us delay - 129 us ramp-up - 173 us ACK window
        #[cfg(not(feature = "fast-ru"))]
        assert_eq!(esb.timer().armed, Some(Duration::from_micros(298)));

        esb.on_timer_expired();
        assert_eq!(esb.radio().calls.last(), Some(&first));

        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));
        assert_eq!(events(&mut esb), [Event::TxSuccess { attempts: 2 }]);
    }

    #[test]
    fn short_delay_retransmits_immediately() {
        let mut config = Config::ptx();
        config.retransmit_delay = Duration::from_micros(435);
        config.bitrate = crate::config::Bitrate::_1Mbps;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"x")).unwrap();

        sent(&mut esb);
        esb.on_timer_expired();
        assert_eq!(esb.state(), State::TransmittingWithAck);
        assert_eq!(esb.timer().starts, 1);
    }

    #[test]
    fn bad_crc_counts_as_missing_ack() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"x")).unwrap();
        sent(&mut esb);

        esb.on_radio_event(RadioEvent::End);
        esb.on_radio_event(RadioEvent::Disabled(Some(Received {
            frame: &[0, 0],
            crc_ok: false,
            crc: 0,
            pipe: 0,
            rssi: 0,
        })));
        assert_eq!(esb.state(), State::RetransmitBackoff);
        assert!(events(&mut esb).is_empty());
    }

    #[test]
    fn stale_timer_after_ack_is_ignored() {
        let mut config = Config::ptx();
        config.tx_mode = TxMode::Manual;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"a")).unwrap();
        esb.enqueue(&payload(0, b"b")).unwrap();
        assert!(esb.start_tx().unwrap());

        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));
        // The expiry raced with the ACK and lost.
        esb.on_timer_expired();

        assert_eq!(events(&mut esb), [Event::TxSuccess { attempts: 1 }]);
        assert!(esb.is_idle());
        assert_eq!(esb.tx_len(), 1);
        assert_eq!(esb.timer().cancels, 1);
    }

    #[test]
    fn ack_payload_lands_in_rx_queue() {
        let mut esb = ptx();
        esb.enqueue(&payload(3, b"ping")).unwrap();
        sent(&mut esb);
        ack(&mut esb, &ack_frame(2, b"pong"));

        assert_eq!(
            events(&mut esb),
            [Event::TxSuccess { attempts: 1 }, Event::RxReceived]
        );
        let received = esb.dequeue_received().unwrap().unwrap();
        assert_eq!(received.data(), b"pong");
        assert_eq!(received.pid().inner(), 2);
        assert_eq!(received.rssi(), 50);
    }

    #[test]
    fn noack_payload_succeeds_without_ack_window() {
        let mut config = Config::ptx();
        config.selective_auto_ack = true;
        let mut esb = ptx_with(config);
        esb.enqueue(&Payload::new_noack(1, b"fire").unwrap()).unwrap();

        assert!(matches!(
            &esb.radio().calls[0],
            RadioCall::Transmit { pipe: 1, frame, listen_after: false } if frame[1] & 1 == 0
        ));
        assert_eq!(esb.state(), State::TransmittingNoAck);

        esb.on_radio_event(RadioEvent::Disabled(None));
        assert_eq!(events(&mut esb), [Event::TxSuccess { attempts: 1 }]);
        assert!(esb.is_idle());
        assert_eq!(esb.timer().starts, 0);
    }

    #[test]
    fn noack_is_ignored_without_selective_auto_ack() {
        let mut esb = ptx();
        esb.enqueue(&Payload::new_noack(1, b"fire").unwrap()).unwrap();
        assert_eq!(esb.state(), State::TransmittingWithAck);
    }

    #[test]
    fn queue_drains_in_order() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"a")).unwrap();
        esb.enqueue(&payload(1, b"b")).unwrap();

        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));
        assert_eq!(esb.state(), State::TransmittingWithAck);
        assert!(matches!(
            esb.radio().calls.last(),
            Some(RadioCall::Transmit { pipe: 1, .. })
        ));

        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));
        assert!(esb.is_idle());
        assert_eq!(esb.tx_len(), 0);
    }

    #[test]
    fn manual_mode_waits_for_start() {
        let mut config = Config::ptx();
        config.tx_mode = TxMode::ManualStart;
        let mut esb = ptx_with(config);

        assert_eq!(esb.start_tx(), Ok(false));
        esb.enqueue(&payload(0, b"a")).unwrap();
        esb.enqueue(&payload(0, b"b")).unwrap();
        assert!(esb.is_idle());
        assert!(esb.radio().calls.is_empty());

        esb.start().unwrap();
        assert_eq!(esb.start_tx(), Err(Error::Busy));
        sent(&mut esb);
        ack(&mut esb, &ack_frame(0, &[]));
        // ManualStart keeps draining
        assert_eq!(esb.state(), State::TransmittingWithAck);
    }

    #[test]
    fn flush_aborts_in_flight_payload() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"x")).unwrap();
        sent(&mut esb);

        esb.flush_tx().unwrap();
        assert_eq!(esb.tx_len(), 0);
        assert_eq!(esb.state(), State::AwaitingAck);

        esb.on_timer_expired();
        assert!(esb.is_idle());
        assert!(events(&mut esb).is_empty());
        assert_eq!(esb.radio().calls.last(), Some(&RadioCall::Disable));

        // A late ACK for the abandoned payload changes nothing.
        ack(&mut esb, &ack_frame(0, &[]));
        assert!(events(&mut esb).is_empty());
    }

    #[test]
    fn flush_during_backoff_then_enqueue_sends_new_payload() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"old")).unwrap();
        sent(&mut esb);
        esb.on_timer_expired();
        assert_eq!(esb.state(), State::RetransmitBackoff);

        esb.flush_tx().unwrap();
        esb.enqueue(&payload(0, b"new")).unwrap();
        esb.on_timer_expired();

        assert!(matches!(
            esb.radio().calls.last(),
            Some(RadioCall::Transmit { frame, .. }) if &frame[2..] == b"new"
        ));
        assert_eq!(esb.state(), State::TransmittingWithAck);
    }

    #[test]
    fn stop_keeps_front_entry() {
        let mut esb = ptx();
        esb.enqueue(&payload(0, b"x")).unwrap();
        sent(&mut esb);

        esb.stop().unwrap();
        assert!(esb.is_idle());
        assert_eq!(esb.tx_len(), 1);
        esb.on_timer_expired();
        assert!(events(&mut esb).is_empty());
    }

    #[test]
    fn fixed_protocol_frame() {
        let mut config = Config::ptx();
        config.protocol = Protocol::Esb;
        config.payload_length = 4;
        let mut esb = ptx_with(config);
        esb.enqueue(&payload(0, b"abcd")).unwrap();

        assert_eq!(
            esb.radio().calls[0],
            RadioCall::Transmit {
                pipe: 0,
                frame: vec![1, 0, b'a', b'b', b'c', b'd'],
                listen_after: true,
            }
        );
        sent(&mut esb);
        ack(&mut esb, &[0, 0, 0, 0, 0, 0]);
        assert_eq!(events(&mut esb), [Event::TxSuccess { attempts: 1 }]);
        assert_eq!(esb.rx_len(), 0);
    }
}
