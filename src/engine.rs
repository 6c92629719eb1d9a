/*! The engine: every piece of modem and protocol state in one value.

Nothing here is global. The platform constructs an [`Engine`] from a
[`Config`] and calls [`Engine::poll`] from its main loop (or a
dedicated task); everything the engine touches in the outside world
goes through the three capability traits on this page.

Per poll the engine:

1. Drains host bytes through the KISS decoder, applying parameter
   commands and queueing data frames.
2. Advances the CSMA transmit scheduler, which may key up and send.
3. Unless half-duplex transmission is in progress, pulls ADC samples,
   demodulates whole blocks, and routes demodulated bits through the
   HDLC deframer and the FX.25 tag correlator in parallel. Recovered
   frames go to the host as KISS data and, parsed, to the frame sink.
*/
use log::{debug, info, trace};

use crate::ax25::{self, Msg};
use crate::config::Config;
use crate::csma::{self, TxScheduler};
use crate::demod::Demodulator;
use crate::fx25;
use crate::hdlc;
use crate::kiss;
use crate::modulator::{Modulator, TxTest};
use crate::{Error, Result};

/// Audio, PTT and time, as the platform provides them.
///
/// Samples are signed 12-bit, centered near zero. DAC samples are
/// unsigned 8-bit for PWM or sigma-delta output.
pub trait SignalIO {
    /// Fetch available ADC samples into `buf`, returning how many
    /// were written. Zero means nothing pending right now.
    fn read_samples(&mut self, buf: &mut [i16]) -> usize;
    /// Emit one DAC sample.
    fn write_sample(&mut self, sample: u8);
    /// Key or unkey the transmitter.
    fn set_ptt(&mut self, on: bool);
    /// Milliseconds from an arbitrary epoch.
    fn now_ms(&mut self) -> u64;
}

/// The serial-like transport carrying KISS to and from the host.
pub trait ByteStream {
    /// Next host byte, if one is pending.
    fn read_byte(&mut self) -> Option<u8>;
    /// Send bytes to the host.
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Receiver of parsed frames. Must not block the pipeline.
pub trait FrameSink {
    /// Called once per received frame.
    fn on_frame(&mut self, msg: &Msg);
}

impl<F: FnMut(&Msg)> FrameSink for F {
    fn on_frame(&mut self, msg: &Msg) {
        self(msg)
    }
}

/// Aggregated counters, the only record signal-path errors leave.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Frames received with a good CRC.
    pub rx_frames: u64,
    /// HDLC closes with a bad CRC.
    pub rx_crc_errors: u64,
    /// Frames dropped for exceeding the length cap.
    pub rx_too_long: u64,
    /// Frames aborted by a ones run.
    pub rx_aborted: u64,
    /// Received frames that did not parse as AX.25 UI.
    pub rx_bad_frames: u64,
    /// FX.25 blocks recovered (clean or repaired).
    pub fx25_recovered: u64,
    /// FX.25 blocks past repair.
    pub fx25_uncorrectable: u64,
    /// KISS protocol errors.
    pub kiss_errors: u64,
    /// Frames transmitted.
    pub tx_frames: u64,
    /// Frames refused or dropped because the TX queue was full.
    pub tx_dropped: u64,
}

/// The modem engine. See the module docs.
pub struct Engine {
    config: Config,
    demod: Demodulator,
    modulator: Modulator,
    deframer: hdlc::Deframer,
    fx25_rx: fx25::Decoder,
    fx25_tx: fx25::Codec,
    kiss: kiss::Decoder,
    sched: TxScheduler,
    pending: Vec<i16>,
    hw_handler: Option<Box<dyn FnMut(&[u8]) + Send>>,
    rx_bad_frames: u64,
}

impl Engine {
    /// Build an engine. All substate is created here; nothing is
    /// persisted anywhere.
    pub fn new(config: Config) -> Result<Self> {
        info!(
            "Engine: {:?} at {} S/s, FX.25 rx {} tx {}",
            config.modem,
            config.modem.sample_rate(),
            config.fx25.rx,
            config.fx25.tx,
        );
        Ok(Self {
            demod: Demodulator::new(&config),
            modulator: Modulator::new(&config),
            deframer: hdlc::Deframer::new(),
            fx25_rx: fx25::Decoder::new(),
            fx25_tx: fx25::Codec::new(),
            kiss: kiss::Decoder::new(),
            sched: TxScheduler::new(),
            pending: Vec::new(),
            hw_handler: None,
            rx_bad_frames: 0,
            config,
        })
    }

    /// Replace the scheduler RNG seed, for deterministic tests.
    pub fn seed_scheduler(&mut self, seed: u64) {
        self.sched = TxScheduler::with_seed(seed);
    }

    /// The live settings. KISS commands write here too.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Update settings that do not change the modem; a modem change
    /// rebuilds the signal chain.
    pub fn set_config(&mut self, config: Config) {
        if config.modem != self.config.modem {
            info!("Engine: modem change to {:?}", config.modem);
            self.demod = Demodulator::new(&config);
            self.modulator = Modulator::new(&config);
            self.deframer = hdlc::Deframer::new();
            self.pending.clear();
        }
        self.config = config;
    }

    /// Install a handler for KISS SETHARDWARE payloads. Without one
    /// they are ignored.
    pub fn set_hardware_handler(&mut self, h: Box<dyn FnMut(&[u8]) + Send>) {
        self.hw_handler = Some(h);
    }

    /// Channel busy?
    pub fn dcd(&self) -> bool {
        self.demod.dcd()
    }

    /// Latest received signal level, mVrms.
    pub fn rssi_mv(&self) -> u16 {
        self.demod.rssi_mv()
    }

    /// True while a transmission is on the air.
    pub fn transmitting(&self) -> bool {
        self.sched.transmitting()
    }

    /// Aggregated counters.
    pub fn counters(&self) -> Counters {
        let d = self.deframer.stats();
        let f = self.fx25_rx.stats();
        let k = self.kiss.stats();
        let s = self.sched.stats();
        Counters {
            rx_frames: d.decoded,
            rx_crc_errors: d.crc_errors,
            rx_too_long: d.too_long,
            rx_aborted: d.aborted,
            rx_bad_frames: self.rx_bad_frames,
            fx25_recovered: f.recovered,
            fx25_uncorrectable: f.uncorrectable,
            kiss_errors: k.protocol_errors,
            tx_frames: s.sent,
            tx_dropped: s.dropped,
        }
    }

    /// Key up and send a test tone for deviation and alignment
    /// checks. Blocks for the duration; normal traffic resumes on the
    /// next poll.
    pub fn send_test(&mut self, test: TxTest, ms: u16, io: &mut dyn SignalIO) {
        info!("Engine: TX test {test:?} for {ms} ms");
        io.set_ptt(true);
        self.modulator.send_test(test, ms, io);
        io.set_ptt(false);
    }

    /// Queue a parsed message for transmission.
    pub fn transmit(&mut self, msg: &Msg) -> Result<()> {
        self.transmit_raw(ax25::build(msg)?)
    }

    /// Queue a raw AX.25 frame (address through info, no FCS).
    pub fn transmit_raw(&mut self, frame: Vec<u8>) -> Result<()> {
        if frame.len() > hdlc::MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(frame.len()));
        }
        self.sched.enqueue(frame)
    }

    /// One cooperative pass over host, transmit and receive work.
    /// Non-blocking apart from the duration of any transmission the
    /// scheduler decides to start.
    pub fn poll(
        &mut self,
        io: &mut dyn SignalIO,
        host: &mut dyn ByteStream,
        sink: &mut dyn FrameSink,
    ) {
        self.poll_host(host);
        self.poll_tx(io);
        self.poll_rx(io, host, sink);
    }

    // Drain the host transport through the KISS decoder.
    fn poll_host(&mut self, host: &mut dyn ByteStream) {
        while let Some(b) = host.read_byte() {
            if let Some(cmd) = self.kiss.feed(b) {
                self.apply_command(cmd);
            }
        }
    }

    fn apply_command(&mut self, cmd: kiss::Command) {
        use kiss::Command::*;
        match cmd {
            Data(frame) => {
                if frame.len() > hdlc::MAX_FRAME_LEN {
                    debug!("Engine: host frame of {} bytes too long", frame.len());
                    return;
                }
                // KISS has no NAK channel; a full queue drops the
                // frame and counts it.
                if self.sched.enqueue(frame).is_err() {
                    debug!("Engine: TX queue full, host frame dropped");
                }
            }
            TxDelay(ms) => self.config.tx_delay_ms = ms,
            Persistence(p) => self.config.persistence = p,
            SlotTime(ms) => self.config.slot_time_ms = ms,
            TxTail(ms) => self.config.tx_tail_ms = ms,
            FullDuplex(on) => self.config.full_duplex = on,
            SetHardware(payload) => {
                if let Some(h) = &mut self.hw_handler {
                    h(&payload);
                }
            }
            Return => {
                // No other mode to return to.
                trace!("Engine: KISS RETURN ignored");
            }
        }
    }

    // Advance the transmit scheduler, performing any radio work it
    // decides on.
    fn poll_tx(&mut self, io: &mut dyn SignalIO) {
        let now = io.now_ms();
        let dcd = self.demod.dcd();
        let mut chan = RadioChannel {
            modulator: &mut self.modulator,
            fx25: self.config.fx25.tx.then_some(&self.fx25_tx),
            io,
        };
        self.sched.poll(now, dcd, &self.config, &mut chan);
    }

    // Pull samples and demodulate.
    fn poll_rx(
        &mut self,
        io: &mut dyn SignalIO,
        host: &mut dyn ByteStream,
        sink: &mut dyn FrameSink,
    ) {
        let mut tmp = [0i16; 512];
        loop {
            let n = io.read_samples(&mut tmp);
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&tmp[..n]);
        }
        if self.sched.transmitting() && !self.config.full_duplex {
            // Half duplex: receive is suppressed while PTT is up.
            if !self.pending.is_empty() {
                trace!("Engine: discarding {} samples during TX", self.pending.len());
                self.pending.clear();
            }
            return;
        }
        let block_size = self.demod.block_size();
        let mut frames: Vec<(Vec<u8>, Option<usize>)> = Vec::new();
        {
            let deframer = &mut self.deframer;
            let fx25_rx = &mut self.fx25_rx;
            let fx25_enabled = self.config.fx25.rx;
            let mut on_bit = |bit: u8| {
                if !fx25_enabled {
                    if let Some(f) = deframer.feed(bit) {
                        frames.push((f, None));
                    }
                    return;
                }
                if fx25_rx.collecting() {
                    if let Some(block) = fx25_rx.feed(bit) {
                        // Run the recovered (or, on FEC failure, the
                        // raw) bytes through a clean deframer pass.
                        deframer.reset();
                        for b in hdlc::bytes_to_bits(&block.data) {
                            if let Some(f) = deframer.feed(b) {
                                frames.push((f, block.fixed));
                            }
                        }
                        deframer.reset();
                    }
                    return;
                }
                if let Some(f) = deframer.feed(bit) {
                    frames.push((f, None));
                }
                fx25_rx.feed(bit);
            };
            while self.pending.len() >= block_size {
                let block: Vec<i16> = self.pending.drain(..block_size).collect();
                self.demod.process_block(&block, &mut on_bit);
            }
        }

        for (frame, fixed) in frames {
            self.deliver(frame, fixed, host, sink);
        }
    }

    fn deliver(
        &mut self,
        frame: Vec<u8>,
        fixed: Option<usize>,
        host: &mut dyn ByteStream,
        sink: &mut dyn FrameSink,
    ) {
        if let Some(n) = fixed {
            debug!("Engine: FX.25 frame, {n} bytes fixed");
        }
        host.write_bytes(&kiss::wrap(&frame));
        match ax25::parse(&frame) {
            Ok(mut msg) => {
                msg.rssi_mv = self.demod.rssi_mv();
                debug!("Engine: rx {msg}");
                sink.on_frame(&msg);
            }
            Err(e) => {
                self.rx_bad_frames += 1;
                debug!("Engine: undecodable frame: {e}");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let c = self.counters();
        info!(
            "Engine: rx {} (crc err {}, aborted {}, fx25 {}/{}), tx {} (dropped {})",
            c.rx_frames,
            c.rx_crc_errors,
            c.rx_aborted,
            c.fx25_recovered,
            c.fx25_uncorrectable,
            c.tx_frames,
            c.tx_dropped,
        );
    }
}

// The scheduler's view of the radio: modulator + PTT, with FX.25
// wrapping when enabled and the frame fits a mode.
struct RadioChannel<'a> {
    modulator: &'a mut Modulator,
    fx25: Option<&'a fx25::Codec>,
    io: &'a mut dyn SignalIO,
}

impl csma::Channel for RadioChannel<'_> {
    fn set_ptt(&mut self, on: bool) {
        debug!("RadioChannel: PTT {on}");
        self.io.set_ptt(on);
    }

    fn send_flags(&mut self, ms: u16) {
        self.modulator.send_flags_ms(ms, self.io);
    }

    fn send_frame(&mut self, frame: &[u8]) {
        if let Some(codec) = self.fx25
            && let Some((mode, block)) = codec.encode_frame(frame)
        {
            // The tag goes out as 64 raw bits; no stuffing applies
            // inside the RS block either.
            self.modulator.send_bits(&fx25::tag_bits(mode.tag), self.io);
            self.modulator.send_bits(&hdlc::bytes_to_bits(&block), self.io);
            return;
        }
        self.modulator.send_frame(frame, self.io);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ax25::Callsign;
    use crate::config::ModemType;

    // A fake radio: transmitted samples pile up in `tx`, and the test
    // can preload `rx` to be "received". Time is advanced by hand.
    #[derive(Default)]
    struct MockIo {
        rx: std::collections::VecDeque<i16>,
        tx: Vec<u8>,
        ptt_log: Vec<bool>,
        now: u64,
    }

    impl SignalIO for MockIo {
        fn read_samples(&mut self, buf: &mut [i16]) -> usize {
            let n = std::cmp::min(buf.len(), self.rx.len());
            for b in buf.iter_mut().take(n) {
                *b = self.rx.pop_front().unwrap();
            }
            n
        }
        fn write_sample(&mut self, sample: u8) {
            self.tx.push(sample);
        }
        fn set_ptt(&mut self, on: bool) {
            self.ptt_log.push(on);
        }
        fn now_ms(&mut self) -> u64 {
            self.now
        }
    }

    #[derive(Default)]
    struct MockHost {
        input: std::collections::VecDeque<u8>,
        output: Vec<u8>,
    }

    impl ByteStream for MockHost {
        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }
        fn write_bytes(&mut self, bytes: &[u8]) {
            self.output.extend_from_slice(bytes);
        }
    }

    struct Frames(Vec<Msg>);

    impl FrameSink for Frames {
        fn on_frame(&mut self, msg: &Msg) {
            self.0.push(msg.clone());
        }
    }

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    fn test_frame() -> Vec<u8> {
        let msg = Msg::new(
            call("N0CALL-1"),
            call("APRS"),
            &[call("WIDE1-1"), call("WIDE2-2")],
            b"=4903.50N/07201.75W-Test",
        )
        .unwrap();
        ax25::build(&msg).unwrap()
    }

    // Demodulate whatever the engine transmitted.
    fn demodulate_tx(config: &Config, samples: &[u8]) -> Vec<Vec<u8>> {
        let mut demod = Demodulator::new(config);
        let mut adc: Vec<i16> = samples.iter().map(|&s| (s as i16 - 128) * 16).collect();
        while !adc.len().is_multiple_of(demod.block_size()) {
            adc.push(0);
        }
        let mut deframer = hdlc::Deframer::new();
        let mut frames = Vec::new();
        for block in adc.chunks(demod.block_size()) {
            demod.process_block(block, &mut |bit| {
                if let Some(f) = deframer.feed(bit) {
                    frames.push(f);
                }
            });
        }
        frames
    }

    fn drive_until_sent(engine: &mut Engine, io: &mut MockIo, host: &mut MockHost) {
        let mut sink = Frames(Vec::new());
        for _ in 0..200 {
            engine.poll(io, host, &mut sink);
            io.now += 25;
            if engine.counters().tx_frames > 0 && !engine.transmitting() {
                break;
            }
        }
    }

    #[test]
    fn kiss_data_transmits_exact_bytes() {
        let config = Config {
            persistence: 255, // every slot draw wins
            ..Config::default()
        };
        let mut engine = Engine::new(config).unwrap();
        engine.seed_scheduler(12345);
        let mut io = MockIo::default();
        let mut host = MockHost::default();
        // The frame contains 0xC0 so the host must escape it; the
        // engine must recover the original bytes exactly.
        let mut frame = test_frame();
        frame.push(kiss::FEND);
        frame.push(kiss::FESC);
        host.input.extend(kiss::wrap(&frame));

        drive_until_sent(&mut engine, &mut io, &mut host);
        assert_eq!(engine.counters().tx_frames, 1);
        assert_eq!(io.ptt_log, vec![true, false]);

        // Preamble length: at least tx_delay worth of samples before
        // the frame (75 flags × 8 bits × 16 samples).
        assert!(io.tx.len() > 75 * 8 * 16);
        let got = demodulate_tx(engine.config(), &io.tx);
        assert_eq!(got, vec![frame]);
    }

    #[test]
    fn received_frames_reach_host_and_sink() {
        let config = Config::default();
        let mut engine = Engine::new(config.clone()).unwrap();
        let mut io = MockIo::default();
        let mut host = MockHost::default();
        let mut sink = Frames(Vec::new());

        // Someone else transmits...
        let mut other = Modulator::new(&config);
        let mut capture = MockIo::default();
        other.send_flags_ms(200, &mut capture);
        other.send_frame(&test_frame(), &mut capture);
        other.send_flags_ms(50, &mut capture);
        io.rx
            .extend(capture.tx.iter().map(|&s| (s as i16 - 128) * 16));

        for _ in 0..100 {
            engine.poll(&mut io, &mut host, &mut sink);
            io.now += 25;
        }
        assert_eq!(engine.counters().rx_frames, 1);
        assert_eq!(sink.0.len(), 1);
        let msg = &sink.0[0];
        assert_eq!(msg.src, call("N0CALL-1"));
        assert_eq!(msg.dst, call("APRS"));
        assert_eq!(msg.info, b"=4903.50N/07201.75W-Test");
        assert!(msg.rssi_mv > 100);
        // The host saw it as a KISS data frame.
        assert_eq!(host.output[0], kiss::FEND);
        assert_eq!(host.output[1], 0x00);
    }

    #[test]
    fn kiss_parameters_update_config() {
        let mut engine = Engine::new(Config::default()).unwrap();
        let mut io = MockIo::default();
        let mut host = MockHost::default();
        let mut sink = Frames(Vec::new());
        host.input
            .extend([kiss::FEND, 0x01, 30, kiss::FEND, kiss::FEND, 0x05, 1, kiss::FEND]);
        host.input.extend([kiss::FEND, 0x02, 200, kiss::FEND]);
        engine.poll(&mut io, &mut host, &mut sink);
        assert_eq!(engine.config().tx_delay_ms, 300);
        assert!(engine.config().full_duplex);
        assert_eq!(engine.config().persistence, 200);
    }

    #[test]
    fn sethardware_routed_to_handler() {
        let mut engine = Engine::new(Config::default()).unwrap();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = std::sync::Arc::clone(&seen);
        engine.set_hardware_handler(Box::new(move |p| {
            seen2.lock().unwrap().push(p.to_vec());
        }));
        let mut io = MockIo::default();
        let mut host = MockHost::default();
        let mut sink = Frames(Vec::new());
        host.input.extend([kiss::FEND, 0x06, 9, 8, 7, kiss::FEND]);
        engine.poll(&mut io, &mut host, &mut sink);
        assert_eq!(*seen.lock().unwrap(), vec![vec![9, 8, 7]]);
    }

    #[test]
    fn fx25_transmit_and_receive() {
        let mut config = Config {
            persistence: 255,
            ..Config::default()
        };
        config.fx25.rx = true;
        config.fx25.tx = true;
        let mut engine = Engine::new(config.clone()).unwrap();
        engine.seed_scheduler(12345);
        let mut io = MockIo::default();
        let mut host = MockHost::default();
        engine.transmit_raw(test_frame()).unwrap();
        drive_until_sent(&mut engine, &mut io, &mut host);

        // Loop the FX.25 transmission back into a second engine.
        let mut rx_engine = Engine::new(config).unwrap();
        let mut rx_io = MockIo::default();
        rx_io
            .rx
            .extend(io.tx.iter().map(|&s| (s as i16 - 128) * 16));
        let mut rx_host = MockHost::default();
        let mut sink = Frames(Vec::new());
        for _ in 0..200 {
            rx_engine.poll(&mut rx_io, &mut rx_host, &mut sink);
            rx_io.now += 25;
        }
        assert_eq!(rx_engine.counters().fx25_recovered, 1);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].info, b"=4903.50N/07201.75W-Test");
    }

    #[test]
    fn tx_queue_full_surfaces_tx_busy() {
        let mut engine = Engine::new(Config::default()).unwrap();
        for _ in 0..csma::TX_QUEUE_LEN {
            engine.transmit_raw(test_frame()).unwrap();
        }
        assert_eq!(engine.transmit_raw(test_frame()), Err(Error::TxBusy));
        assert_eq!(engine.counters().tx_dropped, 1);
    }

    #[test]
    fn oversize_raw_frame_refused() {
        let mut engine = Engine::new(Config::default()).unwrap();
        assert!(matches!(
            engine.transmit_raw(vec![0; hdlc::MAX_FRAME_LEN + 1]),
            Err(Error::FrameTooLarge(_))
        ));
        assert!(engine.transmit_raw(vec![0; hdlc::MAX_FRAME_LEN]).is_ok());
    }

    #[test]
    fn tx_test_keys_and_unkeys() {
        let mut engine = Engine::new(Config::default()).unwrap();
        let mut io = MockIo::default();
        engine.send_test(crate::modulator::TxTest::Mark, 100, &mut io);
        assert_eq!(io.ptt_log, vec![true, false]);
        assert_eq!(io.tx.len(), 120 * 16);
    }

    #[test]
    fn modem_change_rebuilds_chain() {
        let mut engine = Engine::new(Config::default()).unwrap();
        let mut config = engine.config().clone();
        config.modem = ModemType::Fsk9600;
        engine.set_config(config);
        assert_eq!(engine.config().modem, ModemType::Fsk9600);
        assert_eq!(engine.demod.block_size(), 384);
        assert_eq!(engine.modulator.samples_per_bit(), 4);
    }
}
