//! PRX side of the state machine
//!
//! PRX listens for frames from PTXs. The connection is always started by a PTX; payloads queued
//! on a PRX wait for the next frame on their pipe and travel back inside its ACK.

use crate::config::{Protocol, Role};
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
    /// Starts listening on the enabled pipes. A PTX starts draining its queue instead.
    pub fn start_rx(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        if self.config.role != Role::Prx {
            return self.start_tx().map(|_| ());
        }
        debug!(
            "RX on pipes {:b}",
            self.config.addresses.enabled_pipes()
        );
        self.restart_rx();
        Ok(())
    }

    fn restart_rx(&mut self) {
        self.state = State::Receiving;
        self.radio.receive(
            self.config.addresses.enabled_pipes(),
            self.config.payload_length,
            true,
        );
    }

    pub(crate) fn on_disabled_rx(&mut self, received: Option<Received<'_>>) {
        let Some(frame) = received else {
            return self.restart_rx();
        };
        if !frame.crc_ok {
            trace!("CRC error on pipe {}", frame.pipe);
            return self.restart_rx();
        }
        if !self.config.addresses.is_enabled(frame.pipe) {
            trace!("Frame on disabled pipe {}", frame.pipe);
            return self.restart_rx();
        }
        if self.rx_queue.is_full() {
            // Not acknowledged, so the PTX tries again later.
            warn!("RX queue full, dropping frame on pipe {}", frame.pipe);
            return self.restart_rx();
        }

        let Some(view) = decode(
            self.config.protocol,
            frame.frame,
            self.config.payload_length as usize,
            self.config.max_payload_length as usize,
        ) else {
            warn!("Malformed frame on pipe {}", frame.pipe);
            return self.restart_rx();
        };

        let pipe = frame.pipe;
        let duplicate = self.filter.is_duplicate(pipe, view.pid, frame.crc);
        if duplicate {
            trace!("Retransmission on pipe {} pid {}", pipe, view.pid.inner());
        } else {
            self.filter.record(pipe, view.pid, frame.crc);

            // The PTX sent something new, so it got the ACK payload we gave it last time.
            if self.ack_payload_sent[pipe as usize] {
                self.tx_queue.remove_pipe(pipe);
                self.ack_payload_sent[pipe as usize] = false;
                self.events.raise_tx_success(1);
            }

            let pushed = self.rx_queue.push_with(|slot| {
                slot.pipe = pipe;
                slot.pid = view.pid;
                slot.noack = !view.ack;
                slot.rssi = frame.rssi;
                slot.set_data(view.payload)
            });
            match pushed {
                Ok(()) => self.events.raise(EventFlags::RX_RECEIVED),
                Err(e) => warn!("Received payload dropped: {:?}", e),
            }
        }

        if !self.config.expects_ack(!view.ack) {
            return self.restart_rx();
        }

        match self.config.protocol {
            Protocol::EsbDpl => match self.tx_queue.peek_pipe(pipe) {
                Some(payload) => {
                    self.tx_frame
                        .encode(Protocol::EsbDpl, view.pid, view.ack, payload.data());
                    self.ack_payload_sent[pipe as usize] = true;
                }
                None => {
                    self.tx_frame.encode(Protocol::EsbDpl, view.pid, view.ack, &[]);
                    self.ack_payload_sent[pipe as usize] = false;
                }
            },
            Protocol::Esb => self.tx_frame.encode(Protocol::Esb, view.pid, false, &[]),
        }

        self.state = State::SendingAck;
        self.radio.respond(pipe, self.tx_frame.as_bytes());
    }

    pub(crate) fn on_disabled_rx_ack(&mut self) {
        self.restart_rx();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::Event;
    use crate::radio::RadioEvent;
    use crate::testing::{MockRadio, MockTimer, RadioCall, TestEsb, payload};

    fn prx_with(config: Config) -> TestEsb {
        let mut esb = TestEsb::new(MockRadio::default(), MockTimer::default());
        esb.init(config).unwrap();
        esb.start().unwrap();
        esb.radio_mut().calls.clear();
        esb
    }

    fn prx() -> TestEsb {
        prx_with(Config::prx())
    }

    fn events(esb: &mut TestEsb) -> Vec<Event> {
        esb.take_events().iter().collect()
    }

    fn receive(esb: &mut TestEsb, pipe: u8, frame: &[u8], crc: u16) {
        esb.on_radio_event(RadioEvent::Ready);
        esb.on_radio_event(RadioEvent::End);
        esb.on_radio_event(RadioEvent::Disabled(Some(Received {
            frame,
            crc_ok: true,
            crc,
            pipe,
            rssi: 60,
        })));
    }

    /// ACK sent, back to listening.
    fn ack_sent(esb: &mut TestEsb) {
        assert_eq!(esb.state(), State::SendingAck);
        esb.on_radio_event(RadioEvent::Disabled(None));
        assert_eq!(esb.state(), State::Receiving);
    }

    fn responses(esb: &TestEsb) -> Vec<Vec<u8>> {
        esb.radio()
            .calls
            .iter()
            .filter_map(|c| match c {
                RadioCall::Respond { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_listens_on_enabled_pipes() {
        let mut esb = TestEsb::new(MockRadio::default(), MockTimer::default());
        esb.init(Config::prx()).unwrap();
        esb.enable_pipes(0b0000_0101).unwrap();
        esb.start().unwrap();

        assert_eq!(esb.state(), State::Receiving);
        assert_eq!(
            esb.radio().calls.last(),
            Some(&RadioCall::Receive {
                pipes: 0b0000_0101,
                static_len: 32,
                respond_after: true,
            })
        );
        assert_eq!(esb.set_channel(4), Err(Error::Busy));
        esb.stop().unwrap();
        esb.set_channel(4).unwrap();
    }

    #[test]
    fn reception_is_queued_and_acknowledged() {
        let mut esb = prx();
        receive(&mut esb, 2, &[3, 0b011, 7, 8, 9], 0xAAAA);

        assert_eq!(events(&mut esb), [Event::RxReceived]);
        assert_eq!(responses(&esb), [vec![0, 0b011]]);
        ack_sent(&mut esb);

        let p = esb.dequeue_received().unwrap().unwrap();
        assert_eq!(p.data(), &[7, 8, 9]);
        assert_eq!(p.pipe(), 2);
        assert_eq!(p.pid().inner(), 1);
        assert_eq!(p.rssi(), 60);
        assert!(!p.noack());
        assert_eq!(esb.dequeue_received(), Ok(None));
    }

    #[test]
    fn retransmission_is_acknowledged_but_not_delivered_twice() {
        let mut esb = prx();
        receive(&mut esb, 0, &[1, 0b101, 42], 0x1111);
        ack_sent(&mut esb);
        receive(&mut esb, 0, &[1, 0b101, 42], 0x1111);
        ack_sent(&mut esb);

        assert_eq!(events(&mut esb), [Event::RxReceived]);
        assert_eq!(esb.rx_len(), 1);
        assert_eq!(responses(&esb).len(), 2);
    }

    #[test]
    fn same_pid_with_new_crc_is_new_packet() {
        let mut esb = prx();
        receive(&mut esb, 0, &[1, 0b101, 42], 0x1111);
        ack_sent(&mut esb);
        receive(&mut esb, 0, &[1, 0b101, 43], 0x2222);
        assert_eq!(esb.rx_len(), 2);
    }

    #[test]
    fn bad_frames_are_dropped_silently() {
        let mut esb = prx();
        esb.on_radio_event(RadioEvent::Disabled(Some(Received {
            frame: &[1, 0b001, 1],
            crc_ok: false,
            crc: 0,
            pipe: 0,
            rssi: 0,
        })));
        esb.on_radio_event(RadioEvent::Disabled(None));
        receive(&mut esb, 0, &[40, 0b001, 1], 0x1);

        assert_eq!(esb.state(), State::Receiving);
        assert!(esb.take_events().is_empty());
        assert!(responses(&esb).is_empty());
        assert_eq!(esb.rx_len(), 0);
    }

    #[test]
    fn disabled_pipe_is_ignored() {
        let mut esb = TestEsb::new(MockRadio::default(), MockTimer::default());
        esb.init(Config::prx()).unwrap();
        esb.enable_pipes(0b0000_0001).unwrap();
        esb.start().unwrap();

        receive(&mut esb, 3, &[1, 0b001, 1], 0x1);
        assert_eq!(esb.rx_len(), 0);
        assert_eq!(esb.state(), State::Receiving);
    }

    #[test]
    fn full_rx_queue_withholds_ack() {
        let mut esb = prx();
        for i in 0..8u8 {
            receive(&mut esb, 0, &[1, (i % 4) << 1 | 1, i], i as u16);
            ack_sent(&mut esb);
        }
        esb.radio_mut().calls.clear();

        receive(&mut esb, 0, &[1, 0b001, 99], 0x99);
        assert!(responses(&esb).is_empty());
        assert_eq!(esb.rx_len(), 8);

        esb.dequeue_received().unwrap();
        receive(&mut esb, 0, &[1, 0b001, 99], 0x99);
        assert_eq!(responses(&esb).len(), 1);
    }

    #[test]
    fn noack_frame_is_delivered_without_ack() {
        let mut config = Config::prx();
        config.selective_auto_ack = true;
        let mut esb = prx_with(config);

        receive(&mut esb, 1, &[2, 0b010, 5, 6], 0x5);
        assert_eq!(esb.state(), State::Receiving);
        assert!(responses(&esb).is_empty());
        assert!(esb.dequeue_received().unwrap().unwrap().noack());
    }

    #[test]
    fn noack_frame_is_acknowledged_without_selective_auto_ack() {
        let mut esb = prx();
        receive(&mut esb, 1, &[2, 0b010, 5, 6], 0x5);
        assert_eq!(esb.state(), State::SendingAck);
    }

    #[test]
    fn ack_payload_is_retired_by_next_new_packet() {
        let mut esb = prx();
        esb.enqueue(&payload(1, b"reply")).unwrap();
        esb.enqueue(&payload(2, b"other")).unwrap();
        assert_eq!(esb.state(), State::Receiving);

        // First packet carries the reply back.
        receive(&mut esb, 1, &[1, 0b011, 0], 0x10);
        ack_sent(&mut esb);
        // The PTX missed that ACK and retransmits: same reply again, nothing retired.
        receive(&mut esb, 1, &[1, 0b011, 0], 0x10);
        ack_sent(&mut esb);
        assert_eq!(
            responses(&esb),
            [b"\x05\x03reply".to_vec(), b"\x05\x03reply".to_vec()]
        );
        assert_eq!(events(&mut esb), [Event::RxReceived]);
        assert_eq!(esb.tx_len(), 2);

        // A new packet proves the reply arrived.
        receive(&mut esb, 1, &[1, 0b101, 1], 0x20);
        assert_eq!(
            events(&mut esb),
            [Event::TxSuccess { attempts: 1 }, Event::RxReceived]
        );
        assert_eq!(esb.tx_len(), 1);
        assert_eq!(responses(&esb).last(), Some(&vec![0, 0b101]));
        assert_eq!(esb.tx_queue.peek_front().unwrap().pipe(), 2);
    }

    #[test]
    fn fixed_protocol_ack_echoes_pid() {
        let mut config = Config::prx();
        config.protocol = Protocol::Esb;
        config.payload_length = 2;
        let mut esb = prx_with(config);

        receive(&mut esb, 0, &[3, 0, 0xA, 0xB, 0xC], 0x3);
        assert_eq!(esb.dequeue_received().unwrap().unwrap().data(), &[0xA, 0xB]);
        assert_eq!(responses(&esb), [vec![3, 0]]);
    }

    #[test]
    fn flush_rx_forgets_last_packet() {
        let mut esb = prx();
        receive(&mut esb, 0, &[1, 0b101, 42], 0x1111);
        ack_sent(&mut esb);
        esb.flush_rx().unwrap();
        receive(&mut esb, 0, &[1, 0b101, 42], 0x1111);
        assert_eq!(esb.rx_len(), 1);
    }
}
