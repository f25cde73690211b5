//! nRF52 RADIO adapter
//!
//! [`NrfRadio`] programs the RADIO registers for the engine, [`EmbassyAckTimer`] keeps the ACK
//! deadline, and [`run_driver`] is the task that waits for both and feeds the engine.
//!
//! The engine owning these must stay in place while the radio is active, because the radio reads
//! and writes the frame buffers by DMA. Putting the [`SharedEsb`] in a `static` does that.

use core::future::poll_fn;
use core::marker::PhantomData;
use core::sync::atomic::{Ordering, compiler_fence};
use core::task::Poll;

use embassy_futures::select::{Either, select};
use embassy_hal_internal::{PeripheralRef, into_ref};
use embassy_nrf::{
    Peripheral,
    interrupt::{self, typelevel::Interrupt},
    pac,
    radio::Instance,
};
use embassy_sync::waitqueue::AtomicWaker;
use embassy_time::{Duration, Instant, Timer};
use nrf_pac::radio::vals::{self, State as RadioState};

use super::packet::{FRAME_CAPACITY, HEADER_LEN};
use super::{AckTimer, RadioAdapter, RadioEvent, RadioSettings, Received};
use crate::addresses::{AddressUpdate, Addresses, address_conversion, bytewise_bit_swap};
use crate::config::{Bitrate, Crc, Protocol};
use crate::log::{debug, trace};
use crate::shared::SharedEsb;

static WAKER: AtomicWaker = AtomicWaker::new();

pub struct InterruptHandler<T: Instance> {
    _phantom: PhantomData<T>,
}

// FIXME: Here, hard-coded RADIO is used as the value because `radio::Instance::regs()`
// is not publicly available and cannot be used.
// Probably this should not be a problem since there are no nRF devices with radio peripherals other than RADIO,
// but if T is not RADIO this can be unsound.
impl<T: Instance> interrupt::typelevel::Handler<T::Interrupt> for InterruptHandler<T> {
    unsafe fn on_interrupt() {
        pac::RADIO.intenclr().write(|w| w.0 = 0xffff_ffff);
        WAKER.wake();
    }
}

const CRC16_INIT: u32 = 0x0000_FFFF;
const CRC16_POLY: u32 = 0x0001_1021;
const CRC8_INIT: u32 = 0x0000_00FF;
const CRC8_POLY: u32 = 0x0000_0107;

// MODE register values
const MODE_NRF_1MBIT: u8 = 0;
const MODE_NRF_2MBIT: u8 = 1;
const MODE_NRF_250KBIT: u8 = 2;
const MODE_BLE_1MBIT: u8 = 3;
const MODE_BLE_2MBIT: u8 = 4;

fn regs() -> pac::radio::Radio {
    pac::RADIO
}

fn clear_events() {
    let r = regs();
    r.events_ready().write_value(0);
    r.events_end().write_value(0);
    r.events_disabled().write_value(0);
}

fn enable_interrupts() {
    regs().intenset().write(|w| {
        w.set_ready(true);
        w.set_end(true);
        w.set_disabled(true);
    });
}

/// RADIO peripheral driven by the engine.
///
/// **IMPORTANT**: Do **NOT** use peripheral other than [`embassy_nrf::peripherals::RADIO`].
/// It can cause unexpected behavior.
pub struct NrfRadio<'d, T: Instance> {
    _p: PeripheralRef<'d, T>,
    protocol: Protocol,
    rf_channel: u8,
    /// Static payload length of the fixed length protocol
    static_len: u8,
    max_payload_length: u8,
    /// The running operation ends with a received frame.
    receiving: bool,
    tx_buf: [u8; FRAME_CAPACITY],
    rx_buf: [u8; FRAME_CAPACITY],
}

impl<'d, T: Instance> NrfRadio<'d, T> {
    pub fn new(
        radio: impl Peripheral<P = T> + 'd,
        _irq: impl interrupt::typelevel::Binding<T::Interrupt, InterruptHandler<T>> + 'd,
    ) -> Self {
        into_ref!(radio);

        let r = regs();
        // Disable and enable to reset peripheral
        r.power().write(|w| w.set_power(false));
        r.power().write(|w| w.set_power(true));

        // Set fast ramp-up
        #[cfg(feature = "fast-ru")]
        r.modecnf0().write(|w| w.set_ru(vals::Ru::FAST));

        T::Interrupt::unpend();
        unsafe { T::Interrupt::enable() };

        Self {
            _p: radio,
            protocol: Protocol::EsbDpl,
            rf_channel: 2,
            static_len: 0,
            max_payload_length: 32,
            receiving: false,
            tx_buf: [0; FRAME_CAPACITY],
            rx_buf: [0; FRAME_CAPACITY],
        }
    }

    /// Get the current radio state
    pub fn read_state(&self) -> RadioState {
        regs().state().read().state()
    }

    /// Sets the payload length field layout for frames of `len` bytes.
    fn set_payload_format(&mut self, len: u8) {
        let r = regs();
        match self.protocol {
            Protocol::EsbDpl => {
                r.pcnf0().write(|w| {
                    w.set_s0len(false);
                    w.set_lflen(if self.max_payload_length <= 32 { 6 } else { 8 });
                    w.set_s1len(3);
                });
                r.pcnf1().modify(|w| {
                    w.set_statlen(0);
                    w.set_maxlen(self.max_payload_length);
                });
            }
            Protocol::Esb => {
                r.pcnf0().write(|w| {
                    w.set_s0len(true);
                    w.set_lflen(0);
                    w.set_s1len(1);
                });
                r.pcnf1().modify(|w| {
                    w.set_statlen(len);
                    w.set_maxlen(len);
                });
            }
        }
    }

    /// Takes the oldest radio event, copying a received frame into `frame`.
    pub fn take_event<'b>(&mut self, frame: &'b mut [u8; FRAME_CAPACITY]) -> Option<RadioEvent<'b>> {
        let r = regs();
        if r.events_ready().read() != 0 {
            r.events_ready().write_value(0);
            return Some(RadioEvent::Ready);
        }
        if r.events_end().read() != 0 {
            r.events_end().write_value(0);
            return Some(RadioEvent::End);
        }
        if r.events_disabled().read() == 0 {
            return None;
        }
        r.events_disabled().write_value(0);
        dma_end_fence();

        if !core::mem::take(&mut self.receiving) {
            return Some(RadioEvent::Disabled(None));
        }

        let payload_len = match self.protocol {
            Protocol::EsbDpl => self.rx_buf[0],
            Protocol::Esb => self.static_len,
        };
        let len = (HEADER_LEN + payload_len as usize).min(FRAME_CAPACITY);
        frame[..len].copy_from_slice(&self.rx_buf[..len]);

        let received = Received {
            frame: &frame[..len],
            crc_ok: r.crcstatus().read().crcstatus() == vals::Crcstatus::CRCOK,
            crc: r.rxcrc().read().rxcrc() as u16,
            pipe: r.rxmatch().read().rxmatch(),
            rssi: r.rssisample().read().rssisample(),
        };
        trace!("Frame on pipe {} (crc ok: {})", received.pipe, received.crc_ok);
        Some(RadioEvent::Disabled(Some(received)))
    }

    /// Moves the radio to DISABLED, waiting for it to get there.
    fn force_disable(&mut self) {
        let r = regs();
        r.shorts().write(|_| {});
        r.intenclr().write(|w| w.0 = 0xffff_ffff);
        if self.read_state() != RadioState::DISABLED {
            r.events_disabled().write_value(0);
            r.tasks_disable().write_value(1);
            while self.read_state() != RadioState::DISABLED {}
        }
        clear_events();
        self.receiving = false;
        dma_end_fence();
    }
}

impl<T: Instance> RadioAdapter for NrfRadio<'_, T> {
    fn configure(&mut self, settings: &RadioSettings) {
        self.force_disable();
        let r = regs();

        self.protocol = settings.protocol;
        self.rf_channel = settings.rf_channel;
        self.max_payload_length = settings.max_payload_length;

        let mode = match settings.bitrate {
            Bitrate::_1Mbps => MODE_NRF_1MBIT,
            Bitrate::_2Mbps => MODE_NRF_2MBIT,
            Bitrate::_250Kbps => MODE_NRF_250KBIT,
            Bitrate::_1MbpsBle => MODE_BLE_1MBIT,
            Bitrate::_2MbpsBle => MODE_BLE_2MBIT,
        };
        r.mode().write(|w| w.set_mode(vals::Mode::from_bits(mode)));

        // TXPOWER holds the power in dBm as two's complement
        r.txpower()
            .write(|w| w.set_txpower(vals::Txpower::from_bits(settings.tx_power.dbm() as u8)));
        r.frequency().write(|w| w.set_frequency(settings.rf_channel));

        r.pcnf1().write(|w| {
            w.set_whiteen(false);
            w.set_endian(vals::Endian::BIG);
            w.set_balen(settings.address_length - 1);
        });
        self.set_payload_format(self.static_len);

        match settings.crc {
            Crc::_16Bit => {
                r.crcinit().write(|w| w.set_crcinit(CRC16_INIT & 0x00FF_FFFF));
                r.crcpoly().write(|w| w.set_crcpoly(CRC16_POLY & 0x00FF_FFFF));
                r.crccnf().write(|w| w.set_len(vals::Len::TWO));
            }
            Crc::_8Bit => {
                r.crcinit().write(|w| w.set_crcinit(CRC8_INIT & 0x00FF_FFFF));
                r.crcpoly().write(|w| w.set_crcpoly(CRC8_POLY & 0x00FF_FFFF));
                r.crccnf().write(|w| w.set_len(vals::Len::ONE));
            }
            Crc::Off => r.crccnf().write(|w| w.set_len(vals::Len::DISABLED)),
        }
        debug!("Radio configured on channel {}", settings.rf_channel);
    }

    fn set_addresses(&mut self, addresses: &Addresses, update: AddressUpdate) {
        let r = regs();
        if update.contains(AddressUpdate::BASE0) {
            let base0 = address_conversion(u32::from_le_bytes(addresses.base0));
            r.base0().write_value(base0);
        }
        if update.contains(AddressUpdate::BASE1) {
            let base1 = address_conversion(u32::from_le_bytes(addresses.base1));
            r.base1().write_value(base1);
        }
        if update.contains(AddressUpdate::PREFIXES) {
            let [p0, p1, p2, p3, p4, p5, p6, p7] = addresses.prefixes;
            let prefix0 = bytewise_bit_swap(u32::from_le_bytes([p0, p1, p2, p3]));
            let prefix1 = bytewise_bit_swap(u32::from_le_bytes([p4, p5, p6, p7]));
            r.prefix0().write(|w| w.0 = prefix0);
            r.prefix1().write(|w| w.0 = prefix1);
        }
    }

    fn transmit(&mut self, pipe: u8, frame: &[u8], listen_after: bool) {
        let r = regs();
        let len = frame.len().min(FRAME_CAPACITY);
        self.tx_buf[..len].copy_from_slice(&frame[..len]);
        self.receiving = false;

        r.shorts().write(|w| {
            w.set_ready_start(true);
            w.set_end_disable(true);
            w.set_address_rssistart(true);
            w.set_disabled_rssistop(true);
            w.set_disabled_rxen(listen_after);
        });

        r.frequency().write(|w| w.set_frequency(self.rf_channel));
        r.txaddress().write(|w| w.set_txaddress(pipe));
        if listen_after {
            r.rxaddresses().write(|w| w.0 = 1 << pipe);
        }
        self.set_payload_format(len.saturating_sub(HEADER_LEN) as u8);
        r.packetptr().write_value(self.tx_buf.as_ptr() as u32);

        clear_events();
        enable_interrupts();

        dma_start_fence();
        r.tasks_txen().write_value(1);
    }

    fn open_ack_window(&mut self, _pipe: u8) {
        let r = regs();
        // The DISABLED -> RXEN short is already ramping up the receiver.
        r.shorts().modify(|w| w.set_disabled_rxen(false));
        // ACKs of the fixed length protocol carry no payload
        self.static_len = 0;
        self.set_payload_format(0);
        r.packetptr().write_value(self.rx_buf.as_mut_ptr() as u32);
        self.receiving = true;
        enable_interrupts();
    }

    fn receive(&mut self, pipes: u8, static_len: u8, respond_after: bool) {
        self.force_disable();
        let r = regs();

        self.static_len = static_len;
        r.shorts().write(|w| {
            w.set_ready_start(true);
            w.set_end_disable(true);
            w.set_address_rssistart(true);
            w.set_disabled_rssistop(true);
            w.set_disabled_txen(respond_after);
        });

        r.frequency().write(|w| w.set_frequency(self.rf_channel));
        r.rxaddresses().write(|w| w.0 = pipes as u32);
        self.set_payload_format(static_len);
        r.packetptr().write_value(self.rx_buf.as_mut_ptr() as u32);
        self.receiving = true;

        clear_events();
        enable_interrupts();

        dma_start_fence();
        r.tasks_rxen().write_value(1);
    }

    fn respond(&mut self, pipe: u8, frame: &[u8]) {
        let r = regs();
        let len = frame.len().min(FRAME_CAPACITY);
        self.tx_buf[..len].copy_from_slice(&frame[..len]);

        // Must be done before the DISABLED -> TXEN short finishes ramping up.
        r.shorts().modify(|w| w.set_disabled_txen(false));
        r.txaddress().write(|w| w.set_txaddress(pipe));
        self.set_payload_format(len.saturating_sub(HEADER_LEN) as u8);
        dma_start_fence();
        r.packetptr().write_value(self.tx_buf.as_ptr() as u32);
        enable_interrupts();
    }

    fn disable(&mut self) {
        self.force_disable();
    }
}

/// ACK timer on top of `embassy-time`. The deadline is awaited by [`run_driver`].
#[derive(Debug, Default)]
pub struct EmbassyAckTimer {
    deadline: Option<Instant>,
}

impl EmbassyAckTimer {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clears the deadline if it is still `at`. Returns whether it was.
    fn expire(&mut self, at: Instant) -> bool {
        if self.deadline == Some(at) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

impl AckTimer for EmbassyAckTimer {
    fn start(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Waits until the radio raised READY, END or DISABLED.
async fn wait_radio_event() {
    poll_fn(|cx| {
        WAKER.register(cx.waker());
        let r = regs();
        if r.events_ready().read() != 0
            || r.events_end().read() != 0
            || r.events_disabled().read() != 0
        {
            return Poll::Ready(());
        }
        enable_interrupts();
        Poll::Pending
    })
    .await
}

/// Feeds radio interrupts and ACK timer expiries into `esb`. Run this in a dedicated task at a
/// high priority; it never returns.
pub async fn run_driver<T, const TX: usize, const RX: usize, const P: usize>(
    esb: &SharedEsb<NrfRadio<'_, T>, EmbassyAckTimer, TX, RX, P>,
) -> !
where
    T: Instance,
{
    let mut frame = [0; FRAME_CAPACITY];
    loop {
        let deadline = esb.lock(|esb| esb.timer().deadline());
        let timeout = async {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending().await,
            }
        };

        match select(wait_radio_event(), timeout).await {
            Either::First(()) => esb.lock(|esb| {
                while let Some(event) = esb.radio_mut().take_event(&mut frame) {
                    esb.on_radio_event(event);
                }
            }),
            Either::Second(()) => esb.lock(|esb| {
                if let Some(at) = deadline {
                    if esb.timer_mut().expire(at) {
                        esb.on_timer_expired();
                    }
                }
            }),
        }
    }
}

/// NOTE must be followed by a volatile write operation
fn dma_start_fence() {
    compiler_fence(Ordering::Release);
}

/// NOTE must be preceded by a volatile read operation
fn dma_end_fence() {
    compiler_fence(Ordering::Acquire);
}
