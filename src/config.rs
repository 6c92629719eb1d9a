//! Runtime settings for the modem and protocol stack.
//!
//! There is exactly one [`Config`] value, owned by the engine. KISS
//! commands from the host write into it and are authoritative at
//! runtime; a configuration loader writes to the same struct.
use serde::{Deserialize, Serialize};

use crate::Result;

/// Modem selection.
///
/// Each variant fixes the input sample rate, the processing block size
/// and the decimation ratio down to the 9600 Hz symbol-processing rate
/// (9600 Bd runs undecimated at 38.4 kHz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemType {
    /// 1200 Bd AFSK, Bell 202 tones (1200/2200 Hz). The APRS default.
    Afsk1200,
    /// 1200 Bd AFSK, ITU V.23 tones (1300/2100 Hz).
    Afsk1200V23,
    /// 300 Bd AFSK for HF (1600/1800 Hz).
    Afsk300,
    /// 9600 Bd G3RUH scrambled FSK, direct baseband.
    Fsk9600,
}

impl ModemType {
    /// Baud rate.
    pub fn baud(self) -> u32 {
        match self {
            ModemType::Afsk1200 | ModemType::Afsk1200V23 => 1200,
            ModemType::Afsk300 => 300,
            ModemType::Fsk9600 => 9600,
        }
    }

    /// ADC/DAC sample rate in Hz.
    pub fn sample_rate(self) -> u32 {
        match self {
            ModemType::Afsk1200 | ModemType::Afsk1200V23 => 19200,
            ModemType::Afsk300 => 28800,
            ModemType::Fsk9600 => 38400,
        }
    }

    /// Mark and space tone frequencies, `None` for baseband FSK.
    pub fn tones(self) -> Option<(f32, f32)> {
        match self {
            ModemType::Afsk1200 => Some((1200.0, 2200.0)),
            ModemType::Afsk1200V23 => Some((1300.0, 2100.0)),
            ModemType::Afsk300 => Some((1600.0, 1800.0)),
            ModemType::Fsk9600 => None,
        }
    }

    /// Decimation ratio from the input rate to the demodulator rate.
    pub fn resample_ratio(self) -> usize {
        match self {
            ModemType::Fsk9600 => 1,
            other => (other.sample_rate() / 9600) as usize,
        }
    }

    /// Samples per processing block. Must be a multiple of the
    /// resample ratio; 20 ms of audio (10 ms for 9600 Bd).
    pub fn block_size(self) -> usize {
        match self {
            ModemType::Fsk9600 => (self.sample_rate() / 100) as usize,
            other => (other.sample_rate() / 50) as usize,
        }
    }

    /// Samples per bit at the demodulator rate.
    pub fn samples_per_bit(self) -> usize {
        (self.sample_rate() as usize / self.resample_ratio()) / self.baud() as usize
    }
}

/// FX.25 forward error correction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fx25Config {
    /// Watch for FX.25 correlation tags on receive.
    pub rx: bool,
    /// Wrap outgoing frames in FX.25 when they fit a mode.
    pub tx: bool,
}

/// The settings struct. KISS-set values land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Modem type; fixes rates and tones.
    pub modem: ModemType,
    /// Flag preamble before the first frame, in milliseconds.
    pub tx_delay_ms: u16,
    /// Flag tail after the last frame, in milliseconds.
    pub tx_tail_ms: u16,
    /// CSMA slot time in milliseconds.
    pub slot_time_ms: u16,
    /// p-persistence value; transmit probability is (p+1)/256.
    pub persistence: u8,
    /// Transmit regardless of carrier detect, and keep receiving
    /// while PTT is asserted.
    pub full_duplex: bool,
    /// FX.25 FEC settings.
    pub fx25: Fx25Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modem: ModemType::Afsk1200,
            tx_delay_ms: 500,
            tx_tail_ms: 50,
            slot_time_ms: 100,
            persistence: 63,
            full_duplex: false,
            fx25: Fx25Config::default(),
        }
    }
}

impl Config {
    /// Load settings from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_table() {
        assert_eq!(ModemType::Afsk1200.sample_rate(), 19200);
        assert_eq!(ModemType::Afsk1200.resample_ratio(), 2);
        assert_eq!(ModemType::Afsk1200.block_size(), 384);
        assert_eq!(ModemType::Afsk1200.samples_per_bit(), 8);
        assert_eq!(ModemType::Afsk300.sample_rate(), 28800);
        assert_eq!(ModemType::Afsk300.resample_ratio(), 3);
        assert_eq!(ModemType::Afsk300.samples_per_bit(), 32);
        assert_eq!(ModemType::Fsk9600.sample_rate(), 38400);
        assert_eq!(ModemType::Fsk9600.resample_ratio(), 1);
        assert_eq!(ModemType::Fsk9600.block_size(), 384);
        assert_eq!(ModemType::Fsk9600.samples_per_bit(), 4);
    }

    #[test]
    fn block_size_is_multiple_of_ratio() {
        for m in [
            ModemType::Afsk1200,
            ModemType::Afsk1200V23,
            ModemType::Afsk300,
            ModemType::Fsk9600,
        ] {
            assert!(m.block_size().is_multiple_of(m.resample_ratio()));
        }
    }

    #[test]
    fn json_round_trip() -> crate::Result<()> {
        let mut c = Config::default();
        c.persistence = 128;
        c.fx25.rx = true;
        let j = c.to_json()?;
        assert_eq!(Config::from_json(&j)?, c);
        Ok(())
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.tx_delay_ms, 500);
        assert_eq!(c.tx_tail_ms, 50);
        assert_eq!(c.slot_time_ms, 100);
        assert_eq!(c.persistence, 63);
        assert!(!c.full_duplex);
    }
}
