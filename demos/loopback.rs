/*! Modem loopback over a simulated noisy channel.

Builds an APRS position report, transmits it with one engine, adds
channel noise, and receives it with another. Useful for eyeballing
how much noise each modem takes before frames stop decoding.

```no_run
$ cargo run --example loopback -- --noise 200
$ cargo run --example loopback -- --modem 9600 --noise 400 -v 2
```
*/
use std::collections::VecDeque;

use anyhow::Result;
use clap::Parser;
use rand::prelude::*;

use softtnc::aprs::Aprs;
use softtnc::ax25::Msg;
use softtnc::config::{Config, ModemType};
use softtnc::engine::{ByteStream, Engine, FrameSink, SignalIO};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(long, default_value = "1200", help = "Modem: 300, 1200, v23 or 9600")]
    modem: String,

    #[arg(long, default_value = "200.0", help = "Noise amplitude in ADC counts")]
    noise: f32,

    #[arg(long, default_value = "1", help = "Frames to send")]
    count: u32,

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
    fn set_ptt(&mut self, on: bool) {
        eprintln!("PTT {}", if on { "on" } else { "off" });
    }
    fn now_ms(&mut self) -> u64 {
        self.now
    }
}

#[derive(Default)]
struct NullSerial {}

impl ByteStream for NullSerial {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }
    fn write_bytes(&mut self, _bytes: &[u8]) {}
}

struct Printer {
    got: u32,
}

impl FrameSink for Printer {
    fn on_frame(&mut self, msg: &Msg) {
        self.got += 1;
        println!("rx {}: {msg} ({} mVrms)", self.got, msg.rssi_mv);
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

    let modem = match opt.modem.as_str() {
        "300" => ModemType::Afsk300,
        "1200" => ModemType::Afsk1200,
        "v23" => ModemType::Afsk1200V23,
        "9600" => ModemType::Fsk9600,
        other => anyhow::bail!("unknown modem {other:?}"),
    };
    let config = Config {
        modem,
        persistence: 255,
        // 9600 asserts DCD permanently; don't let CSMA starve.
        full_duplex: modem == ModemType::Fsk9600,
        ..Config::default()
    };

    let mut station = Aprs::new(
        "N0CALL-1".parse()?,
        "APRS".parse()?,
        &["WIDE1-1".parse()?, "WIDE2-2".parse()?],
    );
    station.set_position("4903.50N", "07201.75W")?;
    station.symbol = b'-';

    // Transmit side.
    let mut tx = Engine::new(config.clone())?;
    let mut radio = FakeRadio::default();
    let mut serial = NullSerial::default();
    let mut sink = Printer { got: 0 };
    for i in 0..opt.count {
        let payload = station.position_payload(format!("Test {i}").as_bytes());
        tx.transmit(&station.frame(&payload)?)?;
    }
    for _ in 0..200 {
        tx.poll(&mut radio, &mut serial, &mut sink);
        radio.now += 25;
        if tx.counters().tx_frames == opt.count as u64 && !tx.transmitting() {
            break;
        }
    }
    eprintln!(
        "transmitted {} frames, {} samples",
        tx.counters().tx_frames,
        radio.tx.len()
    );

    // The channel.
    let mut rng = StdRng::from_os_rng();
    let air: Vec<i16> = radio
        .tx
        .iter()
        .map(|&s| {
            let clean = (s as i32 - 128) * 16;
            let noise = (rng.random::<f32>() * 2.0 - 1.0) * opt.noise;
            (clean + noise as i32).clamp(-2048, 2047) as i16
        })
        .collect();

    // Receive side.
    let mut rx = Engine::new(config)?;
    let mut rx_radio = FakeRadio::default();
    rx_radio.rx.extend(air);
    let mut rx_serial = NullSerial::default();
    for _ in 0..400 {
        rx.poll(&mut rx_radio, &mut rx_serial, &mut sink);
        rx_radio.now += 25;
        if rx_radio.rx.is_empty() {
            break;
        }
    }

    let c = rx.counters();
    eprintln!(
        "decoded {}/{} (crc errors {}, aborted {})",
        c.rx_frames, opt.count, c.rx_crc_errors, c.rx_aborted
    );
    Ok(())
}
