/*! HDLC framing.

[HDLC][hdlc] carries AX.25 and therefore [APRS][aprs]: frames are
delimited by 0x7E flags, bit-stuffed after five consecutive ones, and
protected by CRC-16-CCITT transmitted complemented, LSB first.

[hdlc]: https://en.wikipedia.org/wiki/High-Level_Data_Link_Control
[aprs]: https://en.wikipedia.org/wiki/Automatic_Packet_Reporting_System
 */
use log::{debug, trace};

/// The flag byte delimiting frames.
pub const FLAG: u8 = 0x7e;

/// Single frame max length. 329 bytes is the theoretical max assuming
/// 2-byte control, 1-byte PID, 256-byte info field and 8 digipeater
/// address fields.
pub const MAX_FRAME_LEN: usize = 329;

/// Minimum frame length after FCS strip: two addresses plus control.
pub const MIN_FRAME_LEN: usize = 15;

// Running FCS over a valid frame including its FCS bytes lands on this
// residue (RFC1662).
const CRC_GOOD: u16 = 0xf0b8;

const CRC_INIT: u16 = 0xffff;

const FCSTAB: &[u16] = &[
    // End of line comments used to prevent fmt from creating too long lines.
    0x0000, 0x1189, 0x2312, 0x329b, 0x4624, 0x57ad, 0x6536, 0x74bf, 0x8c48, //.
    0x9dc1, 0xaf5a, 0xbed3, 0xca6c, 0xdbe5, 0xe97e, 0xf8f7, 0x1081, 0x0108, //.
    0x3393, 0x221a, 0x56a5, 0x472c, 0x75b7, 0x643e, 0x9cc9, 0x8d40, 0xbfdb, //.
    0xae52, 0xdaed, 0xcb64, 0xf9ff, 0xe876, 0x2102, 0x308b, 0x0210, 0x1399, //.
    0x6726, 0x76af, 0x4434, 0x55bd, 0xad4a, 0xbcc3, 0x8e58, 0x9fd1, 0xeb6e, //.
    0xfae7, 0xc87c, 0xd9f5, 0x3183, 0x200a, 0x1291, 0x0318, 0x77a7, 0x662e, //.
    0x54b5, 0x453c, 0xbdcb, 0xac42, 0x9ed9, 0x8f50, 0xfbef, 0xea66, 0xd8fd, //.
    0xc974, 0x4204, 0x538d, 0x6116, 0x709f, 0x0420, 0x15a9, 0x2732, 0x36bb, //.
    0xce4c, 0xdfc5, 0xed5e, 0xfcd7, 0x8868, 0x99e1, 0xab7a, 0xbaf3, 0x5285, //.
    0x430c, 0x7197, 0x601e, 0x14a1, 0x0528, 0x37b3, 0x263a, 0xdecd, 0xcf44, //.
    0xfddf, 0xec56, 0x98e9, 0x8960, 0xbbfb, 0xaa72, 0x6306, 0x728f, 0x4014, //.
    0x519d, 0x2522, 0x34ab, 0x0630, 0x17b9, 0xef4e, 0xfec7, 0xcc5c, 0xddd5, //.
    0xa96a, 0xb8e3, 0x8a78, 0x9bf1, 0x7387, 0x620e, 0x5095, 0x411c, 0x35a3, //.
    0x242a, 0x16b1, 0x0738, 0xffcf, 0xee46, 0xdcdd, 0xcd54, 0xb9eb, 0xa862, //.
    0x9af9, 0x8b70, 0x8408, 0x9581, 0xa71a, 0xb693, 0xc22c, 0xd3a5, 0xe13e, //.
    0xf0b7, 0x0840, 0x19c9, 0x2b52, 0x3adb, 0x4e64, 0x5fed, 0x6d76, 0x7cff, //.
    0x9489, 0x8500, 0xb79b, 0xa612, 0xd2ad, 0xc324, 0xf1bf, 0xe036, 0x18c1, //.
    0x0948, 0x3bd3, 0x2a5a, 0x5ee5, 0x4f6c, 0x7df7, 0x6c7e, 0xa50a, 0xb483, //.
    0x8618, 0x9791, 0xe32e, 0xf2a7, 0xc03c, 0xd1b5, 0x2942, 0x38cb, 0x0a50, //.
    0x1bd9, 0x6f66, 0x7eef, 0x4c74, 0x5dfd, 0xb58b, 0xa402, 0x9699, 0x8710, //.
    0xf3af, 0xe226, 0xd0bd, 0xc134, 0x39c3, 0x284a, 0x1ad1, 0x0b58, 0x7fe7, //.
    0x6e6e, 0x5cf5, 0x4d7c, 0xc60c, 0xd785, 0xe51e, 0xf497, 0x8028, 0x91a1, //.
    0xa33a, 0xb2b3, 0x4a44, 0x5bcd, 0x6956, 0x78df, 0x0c60, 0x1de9, 0x2f72, //.
    0x3efb, 0xd68d, 0xc704, 0xf59f, 0xe416, 0x90a9, 0x8120, 0xb3bb, 0xa232, //.
    0x5ac5, 0x4b4c, 0x79d7, 0x685e, 0x1ce1, 0x0d68, 0x3ff3, 0x2e7a, 0xe70e, //.
    0xf687, 0xc41c, 0xd595, 0xa12a, 0xb0a3, 0x8238, 0x93b1, 0x6b46, 0x7acf, //.
    0x4854, 0x59dd, 0x2d62, 0x3ceb, 0x0e70, 0x1ff9, 0xf78f, 0xe606, 0xd49d, //.
    0xc514, 0xb1ab, 0xa022, 0x92b9, 0x8330, 0x7bc7, 0x6a4e, 0x58d5, 0x495c, //.
    0x3de3, 0x2c6a, 0x1ef1, 0x0f78,
];

fn crc_update(fcs: u16, byte: u8) -> u16 {
    let ofs = ((fcs ^ byte as u16) & 0xff) as usize;
    (fcs >> 8) ^ FCSTAB[ofs]
}

/// Calculate checksum. Code ported from RFC1662.
#[must_use]
pub fn calc_crc(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INIT, |fcs, b| crc_update(fcs, *b)) ^ 0xffff
}

/// Counters kept by the deframer, reported via the engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeframerStats {
    /// Frames delivered with a valid CRC.
    pub decoded: u64,
    /// Closing flag seen but the CRC did not match.
    pub crc_errors: u64,
    /// Frames dropped for exceeding [`MAX_FRAME_LEN`].
    pub too_long: u64,
    /// Frames aborted by seven consecutive one bits.
    pub aborted: u64,
}

/// HDLC deframer.
///
/// Fed one demodulated bit at a time; emits complete frames with the
/// FCS already validated and stripped. Un-stuffing, flag detection and
/// the seven-ones abort all happen here. A corrupt CRC silently drops
/// the frame; only the counter records it.
#[derive(Debug)]
pub struct Deframer {
    // Rolling window of the last eight raw bits.
    shift_reg: u8,
    // Consecutive one bits, saturating at seven.
    ones: u8,
    receiving: bool,
    current_byte: u8,
    bit_index: u8,
    buf: Vec<u8>,
    crc: u16,
    stats: DeframerStats,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    /// Create a new deframer, hunting for a flag.
    pub fn new() -> Self {
        Self {
            shift_reg: 0xff,
            ones: 0,
            receiving: false,
            current_byte: 0,
            bit_index: 0,
            buf: Vec::with_capacity(MAX_FRAME_LEN),
            crc: CRC_INIT,
            stats: DeframerStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> DeframerStats {
        self.stats
    }

    /// Abandon any frame in progress and go back to hunting.
    pub fn reset(&mut self) {
        self.shift_reg = 0xff;
        self.ones = 0;
        self.receiving = false;
        self.open();
    }

    fn open(&mut self) {
        self.current_byte = 0;
        self.bit_index = 0;
        self.buf.clear();
        self.crc = CRC_INIT;
    }

    /// Feed one bit. Returns a complete frame (FCS stripped) when the
    /// closing flag validates one.
    pub fn feed(&mut self, bit: u8) -> Option<Vec<u8>> {
        let bit = bit & 1;
        self.shift_reg = (self.shift_reg >> 1) | (bit << 7);
        if bit != 0 {
            if self.ones < 7 {
                self.ones += 1;
            }
            if self.ones == 7 {
                // Seven ones in a row is invalid. Discard what we've
                // collected.
                if self.receiving {
                    trace!("Deframer: bit abort");
                    self.stats.aborted += 1;
                }
                self.receiving = false;
                return None;
            }
            if self.receiving {
                self.push_bit(1);
            }
            return None;
        }
        // A zero bit ends every run of ones.
        let ones = self.ones;
        self.ones = 0;
        match ones {
            5 => {
                // Stuffed bit, discard.
                None
            }
            6 => self.flag(),
            _ => {
                if self.receiving {
                    self.push_bit(0);
                }
                None
            }
        }
    }

    fn push_bit(&mut self, bit: u8) {
        self.current_byte >>= 1;
        if bit != 0 {
            self.current_byte |= 0x80;
        }
        self.bit_index += 1;
        if self.bit_index == 8 {
            self.bit_index = 0;
            // The 329-byte cap is on the frame proper; the buffer also
            // holds the two FCS bytes.
            if self.buf.len() >= MAX_FRAME_LEN + 2 {
                trace!("Deframer: frame over {MAX_FRAME_LEN} bytes, discarding");
                self.stats.too_long += 1;
                self.receiving = false;
                return;
            }
            self.crc = crc_update(self.crc, self.current_byte);
            self.buf.push(self.current_byte);
        }
    }

    // The flag 0x7E was just completed. Close any frame in progress,
    // then open a new one; back-to-back frames share flags.
    fn flag(&mut self) -> Option<Vec<u8>> {
        let mut out = None;
        if self.receiving {
            // A valid frame ends byte-aligned, with exactly the seven
            // leading flag bits pending in the accumulator.
            if self.bit_index != 7 {
                trace!(
                    "Deframer: frame not byte aligned ({} spare bits)",
                    self.bit_index
                );
            } else if self.buf.len() >= MIN_FRAME_LEN + 2 {
                if self.crc == CRC_GOOD {
                    let mut frame = std::mem::take(&mut self.buf);
                    frame.truncate(frame.len() - 2);
                    self.stats.decoded += 1;
                    debug!("Deframer: captured frame: {frame:0>2x?}");
                    out = Some(frame);
                } else {
                    self.stats.crc_errors += 1;
                    debug!("Deframer: CRC mismatch, dropping {} bytes", self.buf.len());
                }
            } else {
                trace!("Deframer: frame too short: {} bytes", self.buf.len());
            }
        } else {
            trace!("Deframer: found flag");
        }
        self.receiving = true;
        self.open();
        out
    }
}

// Append one byte, LSB first, inserting a stuffed zero after five ones.
fn push_stuffed(bits: &mut Vec<u8>, byte: u8, ones: &mut u8) {
    for i in 0..8 {
        let bit = (byte >> i) & 1;
        bits.push(bit);
        if bit != 0 {
            *ones += 1;
            if *ones == 5 {
                bits.push(0);
                *ones = 0;
            }
        } else {
            *ones = 0;
        }
    }
}

// The flag is exempt from stuffing.
fn push_flag(bits: &mut Vec<u8>) {
    for i in 0..8 {
        bits.push((FLAG >> i) & 1);
    }
}

/// Encode one frame as a bit stream: opening flag, stuffed payload,
/// stuffed complemented CRC (LSB first), closing flag. Preamble and
/// tail flag runs are the transmit scheduler's business and are not
/// included.
#[must_use]
pub fn encode_bits(frame: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity((frame.len() + 4) * 8 + 16);
    push_flag(&mut bits);
    let mut ones = 0;
    for &b in frame {
        push_stuffed(&mut bits, b, &mut ones);
    }
    let crc = calc_crc(frame);
    push_stuffed(&mut bits, (crc & 0xff) as u8, &mut ones);
    push_stuffed(&mut bits, (crc >> 8) as u8, &mut ones);
    push_flag(&mut bits);
    bits
}

/// How many flags cover `ms` milliseconds at `baud` bits per second.
/// Never less than one.
#[must_use]
pub fn flags_for_ms(ms: u32, baud: u32) -> usize {
    std::cmp::max(1, (ms * baud / 8000) as usize)
}

/// Pack a bit stream into bytes, LSB first, padding to `len` bytes
/// with flag bits. Used to fill an FX.25 block.
#[must_use]
pub fn pack_bits(bits: &[u8], len: usize) -> Vec<u8> {
    let mut padded = bits.to_vec();
    // Fill the partial byte with the start of a flag, then whole
    // flag bytes below.
    let mut fi = 0;
    while !padded.len().is_multiple_of(8) {
        padded.push((FLAG >> (fi & 7)) & 1);
        fi += 1;
    }
    let mut bytes: Vec<u8> = padded
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, b)| acc | ((b & 1) << i))
        })
        .collect();
    bytes.resize(len, FLAG);
    bytes
}

/// Expand bytes into bits, LSB first. The inverse of [`pack_bits`].
#[must_use]
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for i in 0..8 {
            bits.push((b >> i) & 1);
        }
    }
    bits
}
