#![warn(missing_docs)]
/*! Software APRS TNC.

This crate is a software modem and protocol stack for amateur-radio
packet data. Baseband audio samples go in, parsed AX.25 frames come
out; symmetrically it takes frames from a KISS host and turns them
into audio samples, keyed behind p-persistence CSMA.

# Architecture overview

All state lives in an [`engine::Engine`] value, polled cooperatively.
The platform injects three capabilities:

* [`engine::SignalIO`] — audio samples, PTT and a millisecond clock.
* [`engine::ByteStream`] — the serial-like KISS transport to the host.
* [`engine::FrameSink`] — the callback receiving parsed frames.

The signal chains are:

```text
receive:   SignalIO → demod → bits → HDLC deframer → (FX.25?) → AX.25 → FrameSink
transmit:  ByteStream → KISS → TX queue → CSMA → HDLC framer → (FX.25?) → modulator → SignalIO
```

Three modems are supported: 1200 Bd AFSK (Bell 202 or V.23 tones),
300 Bd AFSK for HF, and 9600 Bd G3RUH FSK. FX.25 adds Reed-Solomon
forward error correction that stays transparent to plain AX.25
receivers.
 */

// Signal chain.
pub mod agc;
pub mod demod;
pub mod fir;
pub mod modulator;
pub mod nrzi;
pub mod scrambler;

// Protocol chain.
pub mod ax25;
pub mod fx25;
pub mod hdlc;
pub mod kiss;
pub mod rs;

// Glue.
pub mod aprs;
pub mod config;
pub mod csma;
pub mod engine;
pub mod sample_queue;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex data, used by the tone correlators.
pub type Complex = num_complex::Complex<Float>;

/// Errors surfaced to the caller.
///
/// Signal-path trouble (bad CRC, aborted frames, uncorrectable FEC) is
/// recovered locally and only counted; these variants are for the
/// host-facing surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The outbound frame queue is full. The frame was not queued.
    #[error("transmit queue full")]
    TxBusy,

    /// A frame or payload exceeds the AX.25 limits.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The bytes do not form a valid AX.25 UI frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A callsign string does not fit the 6-character + SSID format.
    #[error("invalid callsign: {0}")]
    InvalidCallsign(String),

    /// Reed-Solomon decoding failed; too many symbol errors.
    #[error("uncorrectable FEC block")]
    FecUncorrectable,

    /// Configuration could not be loaded.
    #[error("bad configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result alias used by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_float(left: &[Float], right: &[Float]) {
        assert_eq!(left.len(), right.len(), "\nleft: {left:?}\nright: {right:?}");
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).abs();
            if dist > 0.001 {
                assert_eq!(left[i], right[i], "\nleft: {left:?}\nright: {right:?}");
            }
        }
    }

    /// Turn a string of `0`/`1` characters into bits.
    pub fn str2bits(s: &str) -> Vec<u8> {
        s.chars()
            .map(|ch| match ch {
                '1' => 1,
                '0' => 0,
                _ => panic!("invalid bitstring: {s}"),
            })
            .collect()
    }
}
