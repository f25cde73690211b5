//! Recording radio and timer for host tests

use embassy_time::Duration;

use crate::addresses::{AddressUpdate, Addresses};
use crate::engine::Esb;
use crate::payload::Payload;
use crate::radio::{AckTimer, RadioAdapter, RadioSettings};

pub(crate) type TestEsb = Esb<MockRadio, MockTimer>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RadioCall {
    Configure(RadioSettings),
    SetAddresses(AddressUpdate),
    Transmit {
        pipe: u8,
        frame: Vec<u8>,
        listen_after: bool,
    },
    OpenAckWindow(u8),
    Receive {
        pipes: u8,
        static_len: u8,
        respond_after: bool,
    },
    Respond {
        pipe: u8,
        frame: Vec<u8>,
    },
    Disable,
}

#[derive(Debug, Default)]
pub(crate) struct MockRadio {
    pub calls: Vec<RadioCall>,
    pub addresses: Option<Addresses>,
}

impl RadioAdapter for MockRadio {
    fn configure(&mut self, settings: &RadioSettings) {
        self.calls.push(RadioCall::Configure(settings.clone()));
    }

    fn set_addresses(&mut self, addresses: &Addresses, update: AddressUpdate) {
        self.addresses = Some(addresses.clone());
        self.calls.push(RadioCall::SetAddresses(update));
    }

    fn transmit(&mut self, pipe: u8, frame: &[u8], listen_after: bool) {
        self.calls.push(RadioCall::Transmit {
            pipe,
            frame: frame.to_vec(),
            listen_after,
        });
    }

    fn open_ack_window(&mut self, pipe: u8) {
        self.calls.push(RadioCall::OpenAckWindow(pipe));
    }

    fn receive(&mut self, pipes: u8, static_len: u8, respond_after: bool) {
        self.calls.push(RadioCall::Receive {
            pipes,
            static_len,
            respond_after,
        });
    }

    fn respond(&mut self, pipe: u8, frame: &[u8]) {
        self.calls.push(RadioCall::Respond {
            pipe,
            frame: frame.to_vec(),
        });
    }

    fn disable(&mut self) {
        self.calls.push(RadioCall::Disable);
    }
}

/// Records how it was driven. Expiry is simulated by calling `on_timer_expired` on the engine.
#[derive(Debug, Default)]
pub(crate) struct MockTimer {
    pub armed: Option<Duration>,
    pub starts: usize,
    pub cancels: usize,
}

impl AckTimer for MockTimer {
    fn start(&mut self, timeout: Duration) {
        self.armed = Some(timeout);
        self.starts += 1;
    }

    fn cancel(&mut self) {
        self.armed = None;
        self.cancels += 1;
    }
}

pub(crate) fn payload(pipe: u8, data: &[u8]) -> Payload<32> {
    Payload::new(pipe, data).unwrap()
}

/// Dynamic length ACK frame as a PRX sends it.
pub(crate) fn ack_frame(pid: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![data.len() as u8, pid << 1];
    frame.extend_from_slice(data);
    frame
}
