/*! AFSK/FSK modulator.

Tone synthesis is table driven: a quarter wave of 8-bit sine in 128
entries, mirrored and complemented out to a 512-sample cycle, stepped
by a fixed-point phase accumulator. That is how the 8-bit DAC/PWM
ports expect to be fed, and it keeps the phase continuous across tone
switches, which AFSK receivers care about.

For 9600 Bd G3RUH there are no tones: bits are scrambled, NRZI
encoded and sent as two-level baseband.
*/
use log::debug;

use crate::config::{Config, ModemType};
use crate::engine::SignalIO;
use crate::hdlc;
use crate::nrzi::NrziEncode;
use crate::scrambler::Scrambler;

const SIN_LEN: u32 = 512;

// First quarter of an offset sine wave, 128..=255.
const SIN_TABLE: [u8; 128] = [
    0x80, 0x81, 0x83, 0x84, 0x86, 0x87, 0x89, 0x8a, //.
    0x8c, 0x8e, 0x8f, 0x91, 0x92, 0x94, 0x95, 0x97, //.
    0x98, 0x9a, 0x9b, 0x9d, 0x9e, 0xa0, 0xa2, 0xa3, //.
    0xa5, 0xa6, 0xa7, 0xa9, 0xaa, 0xac, 0xad, 0xaf, //.
    0xb0, 0xb2, 0xb3, 0xb5, 0xb6, 0xb7, 0xb9, 0xba, //.
    0xbc, 0xbd, 0xbe, 0xc0, 0xc1, 0xc2, 0xc4, 0xc5, //.
    0xc6, 0xc8, 0xc9, 0xca, 0xcb, 0xcd, 0xce, 0xcf, //.
    0xd0, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd9, //.
    0xda, 0xdb, 0xdc, 0xdd, 0xde, 0xdf, 0xe0, 0xe1, //.
    0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, //.
    0xea, 0xea, 0xeb, 0xec, 0xed, 0xee, 0xee, 0xef, //.
    0xf0, 0xf1, 0xf1, 0xf2, 0xf3, 0xf3, 0xf4, 0xf5, //.
    0xf5, 0xf6, 0xf6, 0xf7, 0xf8, 0xf8, 0xf9, 0xf9, //.
    0xfa, 0xfa, 0xfa, 0xfb, 0xfb, 0xfc, 0xfc, 0xfc, //.
    0xfd, 0xfd, 0xfd, 0xfd, 0xfe, 0xfe, 0xfe, 0xfe, //.
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, //.
];

// Look up the full 512-sample cycle from the quarter-wave table.
fn sine_sample(idx: u32) -> u8 {
    let idx = (idx % SIN_LEN) as usize;
    let half = idx % 256;
    let quarter = if half >= 128 { 255 - half } else { half };
    let s = SIN_TABLE[quarter];
    if idx >= 256 { 255 - s } else { s }
}

/// Transmit test tones, for deviation and alignment checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTest {
    /// Continuous mark tone.
    Mark,
    /// Continuous space tone.
    Space,
    /// Alternating mark/space at the bit rate.
    Alternating,
}

/// The modulator: bits in, DAC samples out through [`SignalIO`].
#[derive(Debug)]
pub struct Modulator {
    modem: ModemType,
    samples_per_bit: u32,
    // Phase accumulator in units of table steps with 8 fractional
    // bits.
    phase_acc: u32,
    inc_mark: u32,
    inc_space: u32,
    nrzi: NrziEncode,
    scrambler: Scrambler,
}

impl Modulator {
    /// Create a modulator for the configured modem.
    pub fn new(config: &Config) -> Self {
        let modem = config.modem;
        let rate = modem.sample_rate();
        let (inc_mark, inc_space) = match modem.tones() {
            Some((mark, space)) => (tone_inc(mark, rate), tone_inc(space, rate)),
            None => (0, 0),
        };
        debug!(
            "Modulator: {} S/s, {} samples/bit",
            rate,
            rate / modem.baud()
        );
        Self {
            modem,
            samples_per_bit: rate / modem.baud(),
            phase_acc: 0,
            inc_mark,
            inc_space,
            nrzi: NrziEncode::new(),
            scrambler: Scrambler::new(),
        }
    }

    /// Send one already-NRZI-encoded line symbol.
    fn send_symbol(&mut self, symbol: u8, io: &mut dyn SignalIO) {
        match self.modem.tones() {
            Some(_) => {
                let inc = if symbol & 1 == 1 {
                    self.inc_mark
                } else {
                    self.inc_space
                };
                for _ in 0..self.samples_per_bit {
                    self.phase_acc = self.phase_acc.wrapping_add(inc);
                    io.write_sample(sine_sample(self.phase_acc >> 8));
                }
            }
            None => {
                let level = if symbol & 1 == 1 { 0xff } else { 0x00 };
                for _ in 0..self.samples_per_bit {
                    io.write_sample(level);
                }
            }
        }
    }

    /// Modulate one HDLC bit (stuffed stream, flags included).
    pub fn send_bit(&mut self, bit: u8, io: &mut dyn SignalIO) {
        let bit = match self.modem {
            ModemType::Fsk9600 => self.scrambler.next(bit),
            _ => bit,
        };
        let symbol = self.nrzi.encode(bit);
        self.send_symbol(symbol, io);
    }

    /// Modulate a bit stream.
    pub fn send_bits(&mut self, bits: &[u8], io: &mut dyn SignalIO) {
        for &b in bits {
            self.send_bit(b, io);
        }
    }

    /// Send a run of flags covering `ms` milliseconds, for preamble
    /// and tail.
    pub fn send_flags_ms(&mut self, ms: u16, io: &mut dyn SignalIO) {
        let n = hdlc::flags_for_ms(ms as u32, self.modem.baud());
        for _ in 0..n {
            for i in 0..8 {
                self.send_bit((hdlc::FLAG >> i) & 1, io);
            }
        }
    }

    /// Send a complete frame: stuffing and CRC applied here, preamble
    /// and tail are the scheduler's business.
    pub fn send_frame(&mut self, frame: &[u8], io: &mut dyn SignalIO) {
        self.send_bits(&hdlc::encode_bits(frame), io);
    }

    /// Emit `ms` milliseconds of test tone.
    pub fn send_test(&mut self, test: TxTest, ms: u16, io: &mut dyn SignalIO) {
        let bits = self.modem.baud() * ms as u32 / 1000;
        for i in 0..bits {
            let symbol = match test {
                TxTest::Mark => 1,
                TxTest::Space => 0,
                TxTest::Alternating => (i & 1) as u8,
            };
            self.send_symbol(symbol, io);
        }
    }

    /// Samples emitted per bit.
    pub fn samples_per_bit(&self) -> u32 {
        self.samples_per_bit
    }
}

fn tone_inc(freq: f32, sample_rate: u32) -> u32 {
    // Table steps per sample, 8 fractional bits.
    ((SIN_LEN * 256) as f32 * freq / sample_rate as f32).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SignalIO;

    #[derive(Default)]
    struct CaptureIo {
        samples: Vec<u8>,
        ptt: bool,
    }

    impl SignalIO for CaptureIo {
        fn read_samples(&mut self, _buf: &mut [i16]) -> usize {
            0
        }
        fn write_sample(&mut self, s: u8) {
            self.samples.push(s);
        }
        fn set_ptt(&mut self, on: bool) {
            self.ptt = on;
        }
        fn now_ms(&mut self) -> u64 {
            0
        }
    }

    #[test]
    fn sine_table_shape() {
        assert_eq!(sine_sample(0), 0x80);
        assert_eq!(sine_sample(128), 0xff);
        // Second half mirrors below the midline.
        assert_eq!(sine_sample(384), 0x00);
        // Quarter symmetry.
        for i in 0..128 {
            assert_eq!(sine_sample(i), sine_sample(255 - i));
            assert_eq!(sine_sample(i + 256) as u16 + sine_sample(i) as u16, 255);
        }
    }

    #[test]
    fn bit_duration() {
        let mut m = Modulator::new(&Config::default());
        let mut io = CaptureIo::default();
        m.send_bit(1, &mut io);
        assert_eq!(io.samples.len(), 16); // 19200 / 1200
        m.send_bit(0, &mut io);
        assert_eq!(io.samples.len(), 32);
    }

    #[test]
    fn mark_tone_frequency() {
        // A run of 1-bits holds one tone; count zero crossings to
        // estimate its frequency.
        let mut m = Modulator::new(&Config::default());
        let mut io = CaptureIo::default();
        for _ in 0..120 {
            m.send_symbol(1, &mut io);
        }
        let crossings = io
            .samples
            .windows(2)
            .filter(|w| (w[0] < 0x80) != (w[1] < 0x80))
            .count();
        let secs = io.samples.len() as f32 / 19200.0;
        let freq = crossings as f32 / 2.0 / secs;
        assert!((freq - 1200.0).abs() < 60.0, "mark measured {freq} Hz");
    }

    #[test]
    fn space_tone_frequency() {
        let mut m = Modulator::new(&Config::default());
        let mut io = CaptureIo::default();
        for _ in 0..120 {
            m.send_symbol(0, &mut io);
        }
        let crossings = io
            .samples
            .windows(2)
            .filter(|w| (w[0] < 0x80) != (w[1] < 0x80))
            .count();
        let secs = io.samples.len() as f32 / 19200.0;
        let freq = crossings as f32 / 2.0 / secs;
        assert!((freq - 2200.0).abs() < 60.0, "space measured {freq} Hz");
    }

    #[test]
    fn preamble_flag_count() {
        let mut m = Modulator::new(&Config::default());
        let mut io = CaptureIo::default();
        m.send_flags_ms(500, &mut io);
        // 75 flags of 8 bits at 16 samples.
        assert_eq!(io.samples.len(), 75 * 8 * 16);
    }

    #[test]
    fn test_tones() {
        let mut m = Modulator::new(&Config::default());
        let mut io = CaptureIo::default();
        m.send_test(TxTest::Alternating, 100, &mut io);
        // 120 bits of 16 samples each.
        assert_eq!(io.samples.len(), 120 * 16);
        let mut io = CaptureIo::default();
        m.send_test(TxTest::Mark, 50, &mut io);
        assert_eq!(io.samples.len(), 60 * 16);
    }

    #[test]
    fn baseband_9600_levels() {
        let cfg = Config {
            modem: ModemType::Fsk9600,
            ..Config::default()
        };
        let mut m = Modulator::new(&cfg);
        let mut io = CaptureIo::default();
        m.send_bits(&[1, 0, 1, 1, 0, 0, 1, 0], &mut io);
        assert_eq!(io.samples.len(), 8 * 4);
        assert!(io.samples.iter().all(|&s| s == 0x00 || s == 0xff));
    }
}
