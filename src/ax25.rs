/*! AX.25 UI frames.

Only the address/control/info layer lives here: callsigns shifted one
bit left on the wire, the end-of-address marker, the has-been-repeated
flags on digipeater entries, and the UI control/PID bytes APRS uses.
Framing (flags, stuffing, CRC) is [`crate::hdlc`]'s business.
 */
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// UI frame control byte.
pub const CTRL_UI: u8 = 0x03;
/// "No layer 3" PID, the only one APRS uses.
pub const PID_NO_LAYER3: u8 = 0xf0;
/// Maximum number of digipeater entries in the address field.
pub const MAX_RPT: usize = 8;
/// Maximum info field length.
pub const MAX_INFO_LEN: usize = 256;

const ADDR_LEN: usize = 7;

/// A callsign: up to six ASCII characters plus a 4-bit SSID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callsign {
    call: [u8; 6],
    ssid: u8,
}

impl Callsign {
    /// Create a callsign. The call is space padded to six characters;
    /// the SSID must be 0..=15.
    pub fn new(call: &str, ssid: u8) -> Result<Self> {
        if call.is_empty() || call.len() > 6 || ssid > 15 {
            return Err(Error::InvalidCallsign(format!("{call}-{ssid}")));
        }
        let mut c = [b' '; 6];
        for (i, ch) in call.bytes().enumerate() {
            if !ch.is_ascii_graphic() {
                return Err(Error::InvalidCallsign(format!("{call}-{ssid}")));
            }
            c[i] = ch.to_ascii_uppercase();
        }
        Ok(Self { call: c, ssid })
    }

    /// The call letters, without padding.
    pub fn call(&self) -> &str {
        // Only ASCII goes in, so this can't fail.
        std::str::from_utf8(&self.call)
            .unwrap_or("")
            .trim_end_matches(' ')
    }

    /// The SSID, 0..=15.
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    // Wire format: six shifted characters, then the SSID octet with
    // the reserved bits set, bit 7 carrying has-been-repeated and bit
    // 0 the end-of-address marker.
    fn encode_into(&self, out: &mut Vec<u8>, repeated: bool, last: bool) {
        for &c in &self.call {
            out.push(c << 1);
        }
        let mut ssid = 0x60 | (self.ssid << 1);
        if repeated {
            ssid |= 0x80;
        }
        if last {
            ssid |= 0x01;
        }
        out.push(ssid);
    }

    // Returns (callsign, repeated, last).
    fn decode(b: &[u8]) -> (Self, bool, bool) {
        let mut call = [b' '; 6];
        for (i, c) in call.iter_mut().enumerate() {
            *c = b[i] >> 1;
        }
        let ssid = (b[6] >> 1) & 0x0f;
        (Self { call, ssid }, b[6] & 0x80 != 0, b[6] & 0x01 != 0)
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.call())
        } else {
            write!(f, "{}-{}", self.call(), self.ssid)
        }
    }
}

impl FromStr for Callsign {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            None => Callsign::new(s, 0),
            Some((call, ssid)) => {
                let ssid = ssid
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidCallsign(s.to_string()))?;
                Callsign::new(call, ssid)
            }
        }
    }
}

/// A parsed (or to-be-built) UI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// Source station.
    pub src: Callsign,
    /// Destination address (for APRS, usually a software version).
    pub dst: Callsign,
    /// Digipeater path, 0..=8 entries.
    pub path: Vec<Callsign>,
    /// Bitmap of path entries whose has-been-repeated bit is set.
    pub rpt_flags: u8,
    /// Information field.
    pub info: Vec<u8>,
    /// Received signal strength in mVrms; 0 on the transmit side.
    pub rssi_mv: u16,
}

impl Msg {
    /// Build a message for transmission.
    pub fn new(src: Callsign, dst: Callsign, path: &[Callsign], info: &[u8]) -> Result<Self> {
        if path.len() > MAX_RPT {
            return Err(Error::InvalidFrame(format!(
                "{} digipeaters, max {MAX_RPT}",
                path.len()
            )));
        }
        if info.len() > MAX_INFO_LEN {
            return Err(Error::FrameTooLarge(info.len()));
        }
        Ok(Self {
            src,
            dst,
            path: path.to_vec(),
            rpt_flags: 0,
            info: info.to_vec(),
            rssi_mv: 0,
        })
    }

    /// Was path entry `n` already repeated?
    pub fn repeated(&self, n: usize) -> bool {
        self.rpt_flags & (1 << n) != 0
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}>{}", self.src, self.dst)?;
        for (n, hop) in self.path.iter().enumerate() {
            write!(f, ",{hop}")?;
            if self.repeated(n) {
                write!(f, "*")?;
            }
        }
        write!(f, ":{}", String::from_utf8_lossy(&self.info))
    }
}

/// Parse the byte form of a UI frame (no FCS) into a [`Msg`].
pub fn parse(bytes: &[u8]) -> Result<Msg> {
    let mut addrs = Vec::new();
    let mut rpt_flags = 0u8;
    let mut pos = 0;
    loop {
        if bytes.len() < pos + ADDR_LEN {
            return Err(Error::InvalidFrame("truncated address field".into()));
        }
        let (call, repeated, last) = Callsign::decode(&bytes[pos..pos + ADDR_LEN]);
        if addrs.len() >= 2 && repeated {
            rpt_flags |= 1 << (addrs.len() - 2);
        }
        addrs.push(call);
        pos += ADDR_LEN;
        if last {
            break;
        }
        if addrs.len() == 2 + MAX_RPT {
            return Err(Error::InvalidFrame("address field too long".into()));
        }
    }
    if addrs.len() < 2 {
        return Err(Error::InvalidFrame("missing source address".into()));
    }
    if bytes.len() < pos + 2 {
        return Err(Error::InvalidFrame("missing control/PID".into()));
    }
    let ctrl = bytes[pos];
    let pid = bytes[pos + 1];
    if ctrl != CTRL_UI || pid != PID_NO_LAYER3 {
        return Err(Error::InvalidFrame(format!(
            "not a UI frame: ctrl {ctrl:#04x} pid {pid:#04x}"
        )));
    }
    let dst = addrs[0];
    let src = addrs[1];
    Ok(Msg {
        src,
        dst,
        path: addrs[2..].to_vec(),
        rpt_flags,
        info: bytes[pos + 2..].to_vec(),
        rssi_mv: 0,
    })
}

/// Build the byte form of a UI frame (no FCS) from a [`Msg`].
pub fn build(msg: &Msg) -> Result<Vec<u8>> {
    if msg.path.len() > MAX_RPT {
        return Err(Error::InvalidFrame(format!(
            "{} digipeaters, max {MAX_RPT}",
            msg.path.len()
        )));
    }
    if msg.info.len() > MAX_INFO_LEN {
        return Err(Error::FrameTooLarge(msg.info.len()));
    }
    let mut out = Vec::with_capacity((2 + msg.path.len()) * ADDR_LEN + 2 + msg.info.len());
    msg.dst.encode_into(&mut out, false, false);
    msg.src.encode_into(&mut out, false, msg.path.is_empty());
    for (n, hop) in msg.path.iter().enumerate() {
        hop.encode_into(&mut out, msg.repeated(n), n + 1 == msg.path.len());
    }
    out.push(CTRL_UI);
    out.push(PID_NO_LAYER3);
    out.extend_from_slice(&msg.info);
    Ok(out)
}
