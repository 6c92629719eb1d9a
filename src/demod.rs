/*! AFSK/FSK demodulator.

Audio blocks come in from the ADC; demodulated HDLC bits go out to a
sink closure. Per block the pipeline is:

1. DC offset removal by a running mean over the last 125 raw samples.
2. RMS measurement in mV for carrier detect and per-frame RSSI.
3. AGC scaling (the gain learned from previous blocks applies, then
   this block updates it).
4. Anti-alias filter and decimation down to the 9600 Hz symbol
   processing rate (9600 Bd runs undecimated).
5. For AFSK: a mark/space tone correlator over one symbol window; the
   power difference is the raw symbol. For 9600 Bd G3RUH: a direct
   zero-threshold slicer.
6. A symbol PLL with bounded per-transition correction picks the bit
   instants; NRZI decode (and descrambling for G3RUH) recovers bits.

Blocks whose carrier-detect counter is low are measured but not
demodulated; the counters deliberately survive framing errors
untouched.
*/
use log::{debug, trace};

use crate::agc::Agc;
use crate::config::{Config, ModemType};
use crate::fir::Decimator;
use crate::nrzi::NrziDecode;
use crate::scrambler::Descrambler;
use crate::{Complex, Float};

/// Samples in the DC running mean.
const DC_AVG_LEN: usize = 125;

// Signed 12-bit full scale maps to ±1650 mV.
const MV_PER_COUNT: Float = 1650.0 / 2048.0;

// DCD hysteresis: above ≈ -40 dBm count up, below ≈ -46 dBm count
// down.
const DCD_OPEN_MV: Float = 10.0;
const DCD_CLOSE_MV: Float = 5.0;
const DCD_MAX: u8 = 100;
const DCD_ON: u8 = 3;

// Symbol PLL fixed point: 8 steps per sample, corrections of one step
// per observed transition.
const PHASE_BITS: i32 = 8;
const PHASE_INC: i32 = 1;

#[derive(Debug)]
struct DcFilter {
    buf: [i16; DC_AVG_LEN],
    idx: usize,
    sum: i32,
}

impl DcFilter {
    fn new() -> Self {
        Self {
            buf: [0; DC_AVG_LEN],
            idx: 0,
            sum: 0,
        }
    }

    // Update the running mean with one raw sample, returning the
    // current offset estimate.
    fn update(&mut self, sample: i16) -> i32 {
        self.sum += sample as i32 - self.buf[self.idx] as i32;
        self.buf[self.idx] = sample;
        self.idx += 1;
        if self.idx >= DC_AVG_LEN {
            self.idx = 0;
        }
        self.sum / DC_AVG_LEN as i32
    }
}

#[derive(Debug)]
enum Detector {
    /// Dual tone correlator over one symbol window.
    Correlator {
        delay: Vec<Float>,
        pos: usize,
        mark: Vec<Complex>,
        space: Vec<Complex>,
    },
    /// Direct baseband slicer (9600 Bd).
    Slicer,
}

impl Detector {
    fn new(modem: ModemType) -> Self {
        match modem.tones() {
            None => Detector::Slicer,
            Some((mark_hz, space_hz)) => {
                let sps = modem.samples_per_bit();
                let rate = (modem.sample_rate() as usize / modem.resample_ratio()) as Float;
                let taps = |freq: Float| -> Vec<Complex> {
                    (0..sps)
                        .map(|i| {
                            let w = 2.0 * std::f32::consts::PI * freq * i as Float / rate;
                            Complex::new(w.cos(), -w.sin())
                        })
                        .collect()
                };
                Detector::Correlator {
                    delay: vec![0.0; sps],
                    pos: 0,
                    mark: taps(mark_hz),
                    space: taps(space_hz),
                }
            }
        }
    }

    // One filtered sample in, one raw symbol estimate out.
    fn detect(&mut self, sample: Float) -> u8 {
        match self {
            Detector::Slicer => (sample > 0.0) as u8,
            Detector::Correlator {
                delay,
                pos,
                mark,
                space,
            } => {
                delay[*pos] = sample;
                *pos = (*pos + 1) % delay.len();
                let mut m = Complex::new(0.0, 0.0);
                let mut s = Complex::new(0.0, 0.0);
                // Oldest sample first so each tap sees a stable phase.
                for i in 0..delay.len() {
                    let x = delay[(*pos + i) % delay.len()];
                    m += mark[i] * x;
                    s += space[i] * x;
                }
                (m.norm_sqr() > s.norm_sqr()) as u8
            }
        }
    }
}

#[derive(Debug)]
struct Pll {
    phase: i32,
    phase_max: i32,
    threshold: i32,
    sampled: u8,
}

impl Pll {
    fn new(sps: usize) -> Self {
        let phase_max = PHASE_BITS * sps as i32;
        Self {
            phase: 0,
            phase_max,
            threshold: phase_max / 2,
            sampled: 0,
        }
    }

    // Advance one sample. Returns the symbol decision at each bit
    // instant: the majority of the last three raw samples.
    fn advance(&mut self, raw: u8) -> Option<u8> {
        self.sampled = (self.sampled << 1) | (raw & 1);
        // Nudge the phase toward putting bit instants mid-symbol,
        // never more than one step per transition.
        let edge = matches!(self.sampled & 0x03, 0x01 | 0x02);
        if edge {
            if self.phase < self.threshold {
                self.phase += PHASE_INC;
            } else {
                self.phase -= PHASE_INC;
            }
        }
        self.phase += PHASE_BITS;
        if self.phase < self.phase_max {
            return None;
        }
        self.phase %= self.phase_max;
        let last3 = self.sampled & 0x07;
        Some(matches!(last3, 0x03 | 0x05 | 0x06 | 0x07) as u8)
    }
}

#[derive(Debug)]
struct Dcd {
    counter: u8,
    always_on: bool,
    level_mv: u16,
}

impl Dcd {
    fn update(&mut self, mvrms: Float) {
        self.level_mv = mvrms as u16;
        if mvrms > DCD_OPEN_MV {
            if self.counter < DCD_MAX {
                self.counter += 1;
            }
        } else if mvrms < DCD_CLOSE_MV && self.counter > 0 {
            self.counter -= 1;
        }
    }

    fn asserted(&self) -> bool {
        self.always_on || self.counter > DCD_ON
    }
}

/// The demodulator.
///
/// [`Demodulator::process_block`] wants exactly
/// [`ModemType::block_size`] raw samples per call; the engine
/// assembles them from whatever the ADC delivers.
#[derive(Debug)]
pub struct Demodulator {
    modem: ModemType,
    block_size: usize,
    rms_stride: usize,
    dc: DcFilter,
    agc: Agc,
    decimator: Option<Decimator>,
    audio: Vec<Float>,
    decimated: Vec<Float>,
    detector: Detector,
    pll: Pll,
    nrzi: NrziDecode,
    descrambler: Option<Descrambler>,
    dcd: Dcd,
}

impl Demodulator {
    /// Create a demodulator for the configured modem.
    pub fn new(config: &Config) -> Self {
        let modem = config.modem;
        let ratio = modem.resample_ratio();
        let block_size = modem.block_size();
        debug!(
            "Demodulator: {:?}, {} S/s, block {}, {} samples/bit",
            modem,
            modem.sample_rate(),
            block_size,
            modem.samples_per_bit()
        );
        Self {
            modem,
            block_size,
            // Measure every sample at 1:1 rates, every 4th otherwise
            // (and for 9600, which is plenty fast).
            rms_stride: if ratio > 1 || modem == ModemType::Fsk9600 {
                4
            } else {
                1
            },
            dc: DcFilter::new(),
            agc: Agc::new(),
            decimator: if ratio > 1 {
                Some(Decimator::new(modem.sample_rate(), ratio))
            } else {
                None
            },
            audio: Vec::with_capacity(block_size),
            decimated: Vec::with_capacity(block_size),
            detector: Detector::new(modem),
            pll: Pll::new(modem.samples_per_bit()),
            nrzi: NrziDecode::new(),
            descrambler: match modem {
                ModemType::Fsk9600 => Some(Descrambler::new()),
                _ => None,
            },
            dcd: Dcd {
                counter: 0,
                always_on: modem == ModemType::Fsk9600,
                level_mv: 0,
            },
        }
    }

    /// Raw samples per processing block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The modem this demodulator was built for.
    pub fn modem(&self) -> ModemType {
        self.modem
    }

    /// Carrier detect: is the channel busy?
    pub fn dcd(&self) -> bool {
        self.dcd.asserted()
    }

    /// Latest measured signal level in mVrms.
    pub fn rssi_mv(&self) -> u16 {
        self.dcd.level_mv
    }

    /// Current AGC gain, for status displays.
    pub fn agc_gain(&self) -> Float {
        self.agc.gain()
    }

    /// Process one block of raw ADC samples, delivering demodulated
    /// bits to `sink`.
    pub fn process_block(&mut self, samples: &[i16], sink: &mut dyn FnMut(u8)) {
        debug_assert_eq!(samples.len(), self.block_size);
        self.audio.clear();
        let gain = self.agc.gain();
        let mut mv_sum = 0.0f64;
        let mut mv_count = 0u32;
        for (i, &adc) in samples.iter().enumerate() {
            let avg = self.dc.update(adc);
            let centered = (adc as i32 - avg) as Float;
            if i.is_multiple_of(self.rms_stride) {
                let mv = (centered * MV_PER_COUNT) as f64;
                mv_sum += mv * mv;
                mv_count += 1;
            }
            self.audio.push(centered / 2048.0 * gain);
        }
        self.agc.update(&self.audio);
        if mv_count > 0 {
            self.dcd.update((mv_sum / mv_count as f64).sqrt() as Float);
        }
        if !self.dcd.asserted() {
            trace!("Demodulator: no carrier, {} mVrms", self.dcd.level_mv);
            return;
        }

        let work: &[Float] = match &self.decimator {
            Some(d) => {
                d.process(&self.audio, &mut self.decimated);
                &self.decimated
            }
            None => &self.audio,
        };
        for i in 0..work.len() {
            let raw = self.detector.detect(work[i]);
            if let Some(symbol) = self.pll.advance(raw) {
                let bit = self.nrzi.decode(symbol);
                let bit = match &mut self.descrambler {
                    Some(d) => d.next(bit),
                    None => bit,
                };
                sink(bit);
            }
        }
    }
}
