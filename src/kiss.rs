/*! KISS host framing.

[KISS][kiss] is the byte protocol between the TNC and its host:
frames delimited by FEND with a two-level escape for FEND/FESC in the
payload, and a command byte whose high nibble is a port number. This
TNC has a single HDLC port, so the port nibble is stripped off and
ignored.

[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
 */
use log::{debug, trace};

/// Frame delimiter.
pub const FEND: u8 = 0xc0;
/// Escape introducer.
pub const FESC: u8 = 0xdb;
/// Escaped FEND.
pub const TFEND: u8 = 0xdc;
/// Escaped FESC.
pub const TFESC: u8 = 0xdd;

const CMD_DATA: u8 = 0x00;
const CMD_TXDELAY: u8 = 0x01;
const CMD_P: u8 = 0x02;
const CMD_SLOTTIME: u8 = 0x03;
const CMD_TXTAIL: u8 = 0x04;
const CMD_FULLDUPLEX: u8 = 0x05;
const CMD_SETHARDWARE: u8 = 0x06;
const CMD_RETURN: u8 = 0xff;
const CMD_UNKNOWN: u8 = 0xfe;

/// A complete command received from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// An AX.25 frame to transmit.
    Data(Vec<u8>),
    /// TX delay, milliseconds (already scaled from the 10 ms wire
    /// unit).
    TxDelay(u16),
    /// p-persistence value.
    Persistence(u8),
    /// Slot time, milliseconds.
    SlotTime(u16),
    /// TX tail, milliseconds.
    TxTail(u16),
    /// Full duplex on/off.
    FullDuplex(bool),
    /// Opaque hardware-specific payload, routed to a handler.
    SetHardware(Vec<u8>),
    /// Leave KISS mode. A no-op for a pure-KISS TNC.
    Return,
}

/// Counters kept by the decoder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames aborted for malformed escapes or unknown commands.
    pub protocol_errors: u64,
}

/// Streaming KISS decoder.
///
/// Fed one byte at a time; partial frames across reads are fine. A
/// malformed escape (FESC followed by neither TFEND nor TFESC) or an
/// unknown command byte aborts the current frame and the parser waits
/// for the next FEND.
#[derive(Debug, Default)]
pub struct Decoder {
    in_frame: bool,
    escaped: bool,
    command: u8,
    have_command: bool,
    buf: Vec<u8>,
    stats: DecoderStats,
}

impl Decoder {
    /// Create a decoder in the out-of-frame state.
    pub fn new() -> Self {
        Self {
            command: CMD_UNKNOWN,
            ..Default::default()
        }
    }

    /// Counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn abort(&mut self) {
        self.stats.protocol_errors += 1;
        self.in_frame = false;
        self.escaped = false;
        self.buf.clear();
    }

    /// Feed one byte from the host. Returns a command when a frame
    /// completes.
    pub fn feed(&mut self, byte: u8) -> Option<Command> {
        if byte == FEND {
            let done = if self.in_frame && self.have_command {
                self.finish()
            } else {
                None
            };
            // FEND also (re)opens a frame; back-to-back FENDs are
            // idle fill.
            self.in_frame = true;
            self.have_command = false;
            self.escaped = false;
            self.command = CMD_UNKNOWN;
            self.buf.clear();
            return done;
        }
        if !self.in_frame {
            return None;
        }
        if !self.have_command {
            // MicroModem supports only one HDLC port, so strip off
            // the port nibble of the command byte.
            self.command = if byte == CMD_RETURN { byte } else { byte & 0x0f };
            self.have_command = true;
            if !matches!(
                self.command,
                CMD_DATA
                    | CMD_TXDELAY
                    | CMD_P
                    | CMD_SLOTTIME
                    | CMD_TXTAIL
                    | CMD_FULLDUPLEX
                    | CMD_SETHARDWARE
                    | CMD_RETURN
            ) {
                debug!("KISS: unknown command {byte:#04x}");
                self.abort();
            }
            return None;
        }
        if self.escaped {
            self.escaped = false;
            match byte {
                TFEND => self.buf.push(FEND),
                TFESC => self.buf.push(FESC),
                _ => {
                    debug!("KISS: malformed escape {byte:#04x}");
                    self.abort();
                }
            }
            return None;
        }
        if byte == FESC {
            self.escaped = true;
            return None;
        }
        self.buf.push(byte);
        None
    }

    fn finish(&mut self) -> Option<Command> {
        let payload = std::mem::take(&mut self.buf);
        trace!(
            "KISS: frame done, command {:#04x}, {} bytes",
            self.command,
            payload.len()
        );
        match self.command {
            CMD_DATA => {
                if payload.is_empty() {
                    None
                } else {
                    Some(Command::Data(payload))
                }
            }
            // Parameter frames carry a single byte; out-of-domain
            // values are clamped by the consumer, a missing byte is
            // ignored.
            CMD_TXDELAY => param(&payload).map(|v| Command::TxDelay(v as u16 * 10)),
            CMD_P => param(&payload).map(Command::Persistence),
            CMD_SLOTTIME => param(&payload).map(|v| Command::SlotTime(v as u16 * 10)),
            CMD_TXTAIL => param(&payload).map(|v| Command::TxTail(v as u16 * 10)),
            CMD_FULLDUPLEX => param(&payload).map(|v| Command::FullDuplex(v != 0)),
            CMD_SETHARDWARE => Some(Command::SetHardware(payload)),
            CMD_RETURN => Some(Command::Return),
            _ => None,
        }
    }
}

fn param(payload: &[u8]) -> Option<u8> {
    payload.first().copied()
}

/// Wrap an AX.25 frame as a KISS data frame for the host.
///
/// <https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)>
#[must_use]
pub fn wrap(bytes: &[u8]) -> Vec<u8> {
    // Add 10% capacity to leave room for escaped
    let mut ret = Vec::with_capacity((3 + bytes.len()) * 110 / 100);
    ret.push(FEND);
    ret.push(CMD_DATA);
    for &b in bytes {
        match b {
            FEND => ret.extend([FESC, TFEND]),
            FESC => ret.extend([FESC, TFESC]),
            b => ret.push(b),
        }
    }
    ret.push(FEND);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(d: &mut Decoder, bytes: &[u8]) -> Vec<Command> {
        bytes.iter().filter_map(|&b| d.feed(b)).collect()
    }

    #[test]
    fn wrap_escapes() {
        assert_eq!(wrap(b""), vec![FEND, 0, FEND]);
        let got = wrap(b"fo\xC0o\xDB");
        assert_eq!(
            got,
            vec![FEND, 0, b'f', b'o', FESC, TFEND, b'o', FESC, TFESC, FEND]
        );
    }

    #[test]
    fn unwrap_round_trip() {
        let mut d = Decoder::new();
        for payload in [
            b"plain".to_vec(),
            vec![FEND, FESC, FEND, FESC],
            (0u8..=255).collect::<Vec<u8>>(),
        ] {
            let got = feed_all(&mut d, &wrap(&payload));
            assert_eq!(got, vec![Command::Data(payload)]);
        }
    }

    #[test]
    fn data_with_embedded_fend_escape() {
        // DATA frame bearing an embedded FEND escaped as DB DC.
        let mut d = Decoder::new();
        let got = feed_all(&mut d, &[FEND, 0x00, 0x82, 0xa0, FESC, TFEND, 0x61, FEND]);
        assert_eq!(got, vec![Command::Data(vec![0x82, 0xa0, FEND, 0x61])]);
    }

    #[test]
    fn partial_frames_across_reads() {
        let mut d = Decoder::new();
        assert!(feed_all(&mut d, &[FEND, 0x00, 0x11]).is_empty());
        let got = feed_all(&mut d, &[0x22, FEND]);
        assert_eq!(got, vec![Command::Data(vec![0x11, 0x22])]);
    }

    #[test]
    fn parameter_commands_scaled() {
        let mut d = Decoder::new();
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x01, 50, FEND]),
            vec![Command::TxDelay(500)]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x02, 63, FEND]),
            vec![Command::Persistence(63)]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x03, 10, FEND]),
            vec![Command::SlotTime(100)]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x04, 5, FEND]),
            vec![Command::TxTail(50)]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x05, 1, FEND]),
            vec![Command::FullDuplex(true)]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0xff, FEND]),
            vec![Command::Return]
        );
    }

    #[test]
    fn port_nibble_stripped() {
        let mut d = Decoder::new();
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x30, 0x42, FEND]),
            vec![Command::Data(vec![0x42])]
        );
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x51, 20, FEND]),
            vec![Command::TxDelay(200)]
        );
    }

    #[test]
    fn sethardware_opaque() {
        let mut d = Decoder::new();
        assert_eq!(
            feed_all(&mut d, &[FEND, 0x06, 1, 2, 3, FEND]),
            vec![Command::SetHardware(vec![1, 2, 3])]
        );
        assert_eq!(d.stats().protocol_errors, 0);
    }

    #[test]
    fn malformed_escape_aborts() {
        let mut d = Decoder::new();
        let got = feed_all(&mut d, &[FEND, 0x00, 0x11, FESC, 0x99, 0x22, FEND]);
        // Frame dropped; the closing FEND opened a fresh one.
        assert!(got.is_empty());
        assert_eq!(d.stats().protocol_errors, 1);
        // Parser recovered.
        assert_eq!(
            feed_all(&mut d, &[0x00, 0x33, FEND]),
            vec![Command::Data(vec![0x33])]
        );
    }

    #[test]
    fn unknown_command_aborts() {
        let mut d = Decoder::new();
        assert!(feed_all(&mut d, &[FEND, 0x0b, 1, 2, FEND]).is_empty());
        assert_eq!(d.stats().protocol_errors, 1);
    }

    #[test]
    fn idle_fends_ignored() {
        let mut d = Decoder::new();
        assert!(feed_all(&mut d, &[FEND, FEND, FEND]).is_empty());
        assert_eq!(d.stats().protocol_errors, 0);
        assert_eq!(
            feed_all(&mut d, &[0x00, 0x42, FEND]),
            vec![Command::Data(vec![0x42])]
        );
    }

    #[test]
    fn empty_data_frame_ignored() {
        let mut d = Decoder::new();
        assert!(feed_all(&mut d, &[FEND, 0x00, FEND]).is_empty());
    }
}
