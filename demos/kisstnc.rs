/*! A scripted KISS host session against the engine.

Plays the part of a host program: sets TNC parameters over KISS,
queues a data frame (with bytes that need escaping), and shows the
frame coming back out of a second engine listening on the same
simulated channel.

```no_run
$ cargo run --example kisstnc -- -v 2
```
*/
use std::collections::VecDeque;

use anyhow::Result;
use clap::Parser;

use softtnc::ax25::{self, Msg};
use softtnc::config::Config;
use softtnc::engine::{ByteStream, Engine, FrameSink, SignalIO};
use softtnc::kiss;
use softtnc::sample_queue;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(short = 'v', default_value = "0")]
    verbose: usize,
}

#[derive(Default)]
struct FakeRadio {
    rx: VecDeque<i16>,
    tx: Vec<u8>,
    now: u64,
}

impl SignalIO for FakeRadio {
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
    fn set_ptt(&mut self, _on: bool) {}
    fn now_ms(&mut self) -> u64 {
        self.now
    }
}

// Receive-only radio fed by the SPSC sample ring.
struct RingRadio {
    ring: sample_queue::Consumer,
    now: u64,
}

impl SignalIO for RingRadio {
    fn read_samples(&mut self, buf: &mut [i16]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.ring.pop() {
                Some(s) => {
                    buf[n] = s;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
    fn write_sample(&mut self, _sample: u8) {}
    fn set_ptt(&mut self, _on: bool) {}
    fn now_ms(&mut self) -> u64 {
        self.now
    }
}

#[derive(Default)]
struct Serial {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl ByteStream for Serial {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }
}

struct Printer;

impl FrameSink for Printer {
    fn on_frame(&mut self, msg: &Msg) {
        println!("sink: {msg}");
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("softtnc")
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let mut tnc = Engine::new(Config {
        persistence: 255,
        ..Config::default()
    })?;
    let mut radio = FakeRadio::default();
    let mut serial = Serial::default();

    // The "host" sets a short TX delay, then sends a frame whose info
    // field contains both KISS magic bytes.
    serial.input.extend([kiss::FEND, 0x01, 20, kiss::FEND]);
    let frame = ax25::build(&Msg::new(
        "N0CALL-1".parse()?,
        "APRS".parse()?,
        &["WIDE1-1".parse()?],
        &[b'>', b'k', b'i', b's', b's', kiss::FEND, kiss::FESC],
    )?)?;
    serial.input.extend(kiss::wrap(&frame));

    let mut sink = Printer;
    for _ in 0..100 {
        tnc.poll(&mut radio, &mut serial, &mut sink);
        radio.now += 25;
        if tnc.counters().tx_frames > 0 && !tnc.transmitting() {
            break;
        }
    }
    println!(
        "tnc: tx_delay now {} ms, sent {} frame(s), {} samples on air",
        tnc.config().tx_delay_ms,
        tnc.counters().tx_frames,
        radio.tx.len()
    );

    // A listening TNC on the same channel hands the frame to its own
    // host as KISS. Its "ADC interrupt" feeds samples through the
    // lock-free ring, the way a real port does.
    let (adc, ring) = sample_queue::channel(768 * 2);
    let mut listener = Engine::new(Config::default())?;
    let mut rx_radio = RingRadio { ring, now: 0 };
    let mut rx_serial = Serial::default();
    let mut air = radio.tx.iter().map(|&s| (s as i16 - 128) * 16);
    loop {
        // The interrupt side tops the ring up...
        let mut more = false;
        for s in air.by_ref().take(512) {
            adc.push(s);
            more = true;
        }
        // ...and the task side polls.
        listener.poll(&mut rx_radio, &mut rx_serial, &mut sink);
        rx_radio.now += 25;
        if !more && rx_radio.ring.is_empty() {
            break;
        }
    }

    let mut decoder = kiss::Decoder::new();
    for cmd in rx_serial.output.iter().filter_map(|&b| decoder.feed(b)) {
        if let kiss::Command::Data(bytes) = cmd {
            println!(
                "host side: got {} KISS bytes back, intact: {}",
                bytes.len(),
                bytes == frame
            );
        }
    }
    Ok(())
}
