/*! FX.25 — AX.25 with Reed-Solomon FEC.

An FX.25 transmission is a 64-bit correlation tag followed by a fixed
size Reed-Solomon block whose data part is the complete bit-stuffed
AX.25 frame padded out with flags. Receivers that don't speak FX.25
just see noise, then a normal HDLC frame, then more noise: the scheme
is transparent.

The correlation tag identifies the (data, parity) geometry. Tags are
matched against a sliding 64-bit window with a Hamming-distance
budget, so the tag itself survives bit errors too.
 */
use log::{debug, trace};

use crate::hdlc;
use crate::rs::ReedSolomon;

/// Maximum Hamming distance when comparing tags.
const MAX_TAG_DISTANCE: u32 = 10;

/// One FX.25 operating mode: a Reed-Solomon geometry and the tag that
/// announces it on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// The 64-bit correlation tag, transmitted LSB first.
    pub tag: u64,
    /// RS data bytes (K).
    pub data_size: usize,
    /// RS parity bytes (T).
    pub parity_size: usize,
}

impl Mode {
    /// Total block size on the wire, after the tag.
    pub fn block_size(&self) -> usize {
        self.data_size + self.parity_size
    }
}

/// The eleven standardized modes. The exact tag values are required
/// for interoperability.
pub static MODE_LIST: [Mode; 11] = [
    Mode { tag: 0xB74DB7DF8A532F3E, data_size: 239, parity_size: 16 },
    Mode { tag: 0x26FF60A600CC8FDE, data_size: 128, parity_size: 16 },
    Mode { tag: 0xC7DC0508F3D9B09E, data_size: 64, parity_size: 16 },
    Mode { tag: 0x8F056EB4369660EE, data_size: 32, parity_size: 16 },
    Mode { tag: 0x6E260B1AC5835FAE, data_size: 223, parity_size: 32 },
    Mode { tag: 0xFF94DC634F1CFF4E, data_size: 128, parity_size: 32 },
    Mode { tag: 0x1EB7B9CDBC09C00E, data_size: 64, parity_size: 32 },
    Mode { tag: 0xDBF869BD2DBB1776, data_size: 32, parity_size: 32 },
    Mode { tag: 0x3ADB0C13DEAE2836, data_size: 191, parity_size: 64 },
    Mode { tag: 0xAB69DB6A543188D6, data_size: 128, parity_size: 64 },
    Mode { tag: 0x4A4ABEC4A724B796, data_size: 64, parity_size: 64 },
];

/// Find the mode a received tag announces, tolerating up to ten
/// flipped bits. First match in table order wins.
pub fn mode_for_tag(tag: u64) -> Option<&'static Mode> {
    MODE_LIST
        .iter()
        .find(|m| (tag ^ m.tag).count_ones() <= MAX_TAG_DISTANCE)
}

/// Pick a mode for a payload of `size` bytes (the bit-stuffed frame
/// including flags and CRC), or `None` when the frame is too big and
/// plain AX.25 must be used. This is the UZ7HO Soundmodem convention.
pub fn mode_for_size(size: usize) -> Option<&'static Mode> {
    match size {
        0..=32 => Some(&MODE_LIST[3]),
        33..=64 => Some(&MODE_LIST[2]),
        65..=128 => Some(&MODE_LIST[5]),
        129..=191 => Some(&MODE_LIST[8]),
        192..=223 => Some(&MODE_LIST[4]),
        224..=239 => Some(&MODE_LIST[0]),
        _ => None,
    }
}

/// The Reed-Solomon codecs for the three parity sizes, generated once
/// so per-block encode/decode never rebuilds a generator polynomial.
#[derive(Debug)]
pub struct Codec {
    rs16: ReedSolomon,
    rs32: ReedSolomon,
    rs64: ReedSolomon,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Pregenerate the three codecs.
    pub fn new() -> Self {
        Self {
            rs16: ReedSolomon::new(16),
            rs32: ReedSolomon::new(32),
            rs64: ReedSolomon::new(64),
        }
    }

    fn rs_for(&self, mode: &Mode) -> &ReedSolomon {
        match mode.parity_size {
            16 => &self.rs16,
            32 => &self.rs32,
            _ => &self.rs64,
        }
    }

    /// Wrap one AX.25 frame (address through info, no FCS) for
    /// transmission. Returns the mode and the complete RS block; the
    /// caller transmits the mode's tag first, LSB first, then the
    /// block. `None` when the stuffed frame exceeds every mode.
    pub fn encode_frame(&self, frame: &[u8]) -> Option<(&'static Mode, Vec<u8>)> {
        let bits = hdlc::encode_bits(frame);
        let stuffed_len = bits.len().div_ceil(8);
        let mode = mode_for_size(stuffed_len)?;
        let mut block = hdlc::pack_bits(&bits, mode.data_size);
        block.resize(mode.block_size(), 0);
        self.rs_for(mode).encode(&mut block, mode.data_size);
        debug!(
            "FX.25: wrapped {} byte frame as ({},{})",
            frame.len(),
            mode.data_size,
            mode.parity_size
        );
        Some((mode, block))
    }

    /// Try to repair a received block in place. Returns the number of
    /// corrected bytes, or an error when uncorrectable.
    pub fn decode_block(&self, mode: &Mode, block: &mut [u8]) -> crate::Result<usize> {
        self.rs_for(mode).decode(block, mode.data_size)
    }
}

/// A decoded (or failed) FX.25 block, handed back from the decoder.
#[derive(Debug)]
pub struct Block {
    /// The data part of the block: a bit-stuffed AX.25 frame plus
    /// flag padding, ready to feed through an HDLC deframer.
    pub data: Vec<u8>,
    /// Byte corrections made, or `None` when the RS decode failed and
    /// `data` is the block as received.
    pub fixed: Option<usize>,
}

#[derive(Debug, Default)]
enum State {
    /// Sliding-window tag hunt.
    #[default]
    Hunt,
    /// Tag seen; accumulating the RS block.
    Collect {
        mode: &'static Mode,
        buf: Vec<u8>,
        current_byte: u8,
        bit_index: u8,
    },
}

/// Counters kept by the receive side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    /// Tags recognized.
    pub tags: u64,
    /// Blocks that decoded clean or were repaired.
    pub recovered: u64,
    /// Blocks the RS decoder gave up on.
    pub uncorrectable: u64,
}

/// Receive-side FX.25 decoder.
///
/// Fed every demodulated bit in parallel with the HDLC deframer. It
/// watches a sliding 64-bit window for any known tag; once one
/// matches it collects the block and runs the RS decode. While a
/// block is being collected the caller should bypass the plain HDLC
/// deframer (see [`Decoder::collecting`]).
#[derive(Debug)]
pub struct Decoder {
    codec: Codec,
    window: u64,
    state: State,
    stats: DecoderStats,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder with its own pregenerated codecs.
    pub fn new() -> Self {
        Self {
            codec: Codec::new(),
            window: 0,
            state: State::Hunt,
            stats: DecoderStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// True while a tagged block is being accumulated.
    pub fn collecting(&self) -> bool {
        matches!(self.state, State::Collect { .. })
    }

    /// Drop any block in progress and go back to hunting.
    pub fn reset(&mut self) {
        self.window = 0;
        self.state = State::Hunt;
    }

    /// Feed one bit. Returns a block once `data + parity` bytes have
    /// been collected and run through the RS decoder.
    pub fn feed(&mut self, bit: u8) -> Option<Block> {
        match &mut self.state {
            State::Hunt => {
                self.window = (self.window >> 1) | ((bit as u64 & 1) << 63);
                if let Some(mode) = mode_for_tag(self.window) {
                    trace!(
                        "FX.25: tag match, mode ({},{})",
                        mode.data_size, mode.parity_size
                    );
                    self.stats.tags += 1;
                    self.window = 0;
                    self.state = State::Collect {
                        mode,
                        buf: Vec::with_capacity(mode.block_size()),
                        current_byte: 0,
                        bit_index: 0,
                    };
                }
                None
            }
            State::Collect {
                mode,
                buf,
                current_byte,
                bit_index,
            } => {
                *current_byte >>= 1;
                if bit & 1 != 0 {
                    *current_byte |= 0x80;
                }
                *bit_index += 1;
                if *bit_index < 8 {
                    return None;
                }
                *bit_index = 0;
                buf.push(*current_byte);
                if buf.len() < mode.block_size() {
                    return None;
                }
                let mode = *mode;
                let mut block = std::mem::take(buf);
                self.state = State::Hunt;
                match self.codec.decode_block(mode, &mut block) {
                    Ok(fixed) => {
                        debug!("FX.25: block recovered, {fixed} corrections");
                        self.stats.recovered += 1;
                        block.truncate(mode.data_size);
                        Some(Block {
                            data: block,
                            fixed: Some(fixed),
                        })
                    }
                    Err(_) => {
                        // Uncorrectable. Hand the raw bytes back so the
                        // caller can still try a plain AX.25 decode.
                        debug!("FX.25: block uncorrectable");
                        self.stats.uncorrectable += 1;
                        block.truncate(mode.data_size);
                        Some(Block {
                            data: block,
                            fixed: None,
                        })
                    }
                }
            }
        }
    }
}

/// Expand a tag into the bit order it is transmitted in.
pub fn tag_bits(tag: u64) -> Vec<u8> {
    (0..64).map(|i| ((tag >> i) & 1) as u8).collect()
}
