//! Automatic gain control.
//!
//! Block-based: the gain applied to a block is the one learned from
//! the previous blocks, then the block's RMS updates it. Fast attack,
//! slow release, hard clamped so a dead or screaming input can never
//! run the gain away.
use crate::Float;

const TARGET_RMS: Float = 0.2; // -10 dBFS
const ATTACK: Float = 0.02;
const RELEASE: Float = 0.001;
const MAX_GAIN: Float = 10.0;
const MIN_GAIN: Float = 0.1;

/// Block-RMS AGC state.
#[derive(Debug)]
pub struct Agc {
    gain: Float,
}

impl Default for Agc {
    fn default() -> Self {
        Self::new()
    }
}

impl Agc {
    /// Create with unity gain.
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    /// The gain to apply to the current block.
    pub fn gain(&self) -> Float {
        self.gain
    }

    /// Update the gain from one block of (already gain-scaled)
    /// samples. Returns the new gain.
    pub fn update(&mut self, block: &[Float]) -> Float {
        if block.is_empty() {
            return self.gain;
        }
        let sum_sq: Float = block.iter().map(|s| s * s).sum();
        let rms = (sum_sq / block.len() as Float).sqrt();
        let error = TARGET_RMS / (rms + 1e-6);
        let rate = if error < 1.0 { RELEASE } else { ATTACK };
        self.gain = self.gain * (1.0 - rate) + (self.gain * error) * rate;
        self.gain = self.gain.clamp(MIN_GAIN, MAX_GAIN);
        self.gain
    }
}
