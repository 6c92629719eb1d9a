//! Small FIR filters.
//!
//! Nothing fancy lives here: an 8-tap anti-alias filter ahead of the
//! decimator is the widest filter in the signal chain, so plain
//! direct-form convolution is plenty.
use itertools::izip;

use crate::Float;

/// A finite impulse response filter.
#[derive(Debug, Clone)]
pub struct Fir {
    taps: Vec<Float>,
}

impl Fir {
    /// Create a filter from taps.
    pub fn new(taps: &[Float]) -> Self {
        Self {
            taps: taps.to_vec(),
        }
    }

    /// Number of taps.
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    /// True if there are no taps.
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Dot product of the taps against the start of `input`. Short
    /// input is treated as zero padded.
    pub fn filter(&self, input: &[Float]) -> Float {
        izip!(&self.taps, input).map(|(t, x)| t * x).sum()
    }
}

/// Anti-alias filter and decimate in one pass, the filter evaluated
/// only at the output points.
#[derive(Debug, Clone)]
pub struct Decimator {
    fir: Fir,
    ratio: usize,
}

impl Decimator {
    /// Create a decimator for `ratio`:1, low-passed at 80% of the
    /// output Nyquist.
    pub fn new(input_rate: u32, ratio: usize) -> Self {
        let out_nyquist = input_rate as Float / ratio as Float / 2.0;
        Self {
            fir: Fir::new(&low_pass(input_rate as Float, 0.8 * out_nyquist, 8)),
            ratio,
        }
    }

    /// Decimation ratio.
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Filter and decimate one block into `out`.
    pub fn process(&self, block: &[Float], out: &mut Vec<Float>) {
        out.clear();
        for i in (0..block.len()).step_by(self.ratio) {
            out.push(self.fir.filter(&block[i..]));
        }
    }
}

/// Design a low-pass FIR: windowed sinc with a Hamming window,
/// normalized to unity DC gain.
#[must_use]
pub fn low_pass(samp_rate: Float, cutoff: Float, ntaps: usize) -> Vec<Float> {
    let pi = std::f64::consts::PI as Float;
    let m = (ntaps - 1) as Float;
    let fwt0 = 2.0 * pi * cutoff / samp_rate;
    let taps: Vec<Float> = (0..ntaps)
        .map(|i| {
            let n = i as Float - m / 2.0;
            let window = 0.54 - 0.46 * (2.0 * pi * i as Float / m).cos();
            let sinc = if n.abs() < 1e-6 {
                fwt0 / pi
            } else {
                (n * fwt0).sin() / (n * pi)
            };
            sinc * window
        })
        .collect();
    let gain: Float = taps.iter().sum();
    taps.into_iter().map(|t| t / gain).collect()
}
