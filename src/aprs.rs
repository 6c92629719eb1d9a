/*! APRS payload building.

The application layer above the modem: plain byte-building helpers
for the two payload kinds a tracker actually sends, position reports
and messages. The core pipeline neither knows nor cares about these;
they produce `info` fields to hand to [`crate::ax25::Msg`] and
[`crate::engine::Engine::transmit`].
*/
use crate::ax25::{Callsign, Msg};
use crate::{Error, Result};

const MAX_MESSAGE_LEN: usize = 67;

/// PHG (power-height-gain-directivity) station extension, each digit
/// 0..=9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phg {
    /// Power code.
    pub power: u8,
    /// Antenna height code.
    pub height: u8,
    /// Antenna gain code.
    pub gain: u8,
    /// Directivity code.
    pub directivity: u8,
}

/// Station settings for payload building.
#[derive(Debug, Clone)]
pub struct Aprs {
    /// Our callsign.
    pub src: Callsign,
    /// APRS destination (conventionally a software identifier).
    pub dst: Callsign,
    /// Digipeater path.
    pub path: Vec<Callsign>,
    /// Latitude, APRS text form: `4903.50N`.
    pub latitude: [u8; 8],
    /// Longitude, APRS text form: `07201.75W`.
    pub longitude: [u8; 9],
    /// Symbol table selector, `/` (primary) or `\` (alternate).
    pub symbol_table: u8,
    /// Symbol code within the table.
    pub symbol: u8,
    /// Optional PHG extension.
    pub phg: Option<Phg>,
    /// Message recipient.
    pub recipient: Option<Callsign>,
    /// Rolling message sequence number, 0..=999.
    seq: u16,
}

impl Aprs {
    /// Create settings with the conventional defaults.
    pub fn new(src: Callsign, dst: Callsign, path: &[Callsign]) -> Self {
        Self {
            src,
            dst,
            path: path.to_vec(),
            latitude: *b"0000.00N",
            longitude: *b"00000.00W",
            symbol_table: b'/',
            symbol: b'n',
            phg: None,
            recipient: None,
            seq: 0,
        }
    }

    /// Set the position from APRS-format text. Errors when the
    /// lengths are not 8 and 9 characters.
    pub fn set_position(&mut self, lat: &str, lon: &str) -> Result<()> {
        self.latitude = lat
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidFrame(format!("latitude {lat:?}")))?;
        self.longitude = lon
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidFrame(format!("longitude {lon:?}")))?;
        Ok(())
    }

    /// Use the alternate symbol table.
    pub fn use_alternate_symbol_table(&mut self, alternate: bool) {
        self.symbol_table = if alternate { b'\\' } else { b'/' };
    }

    /// Build a position report payload: `=` + latitude + symbol table
    /// + longitude + symbol, optionally PHG, then the comment.
    pub fn position_payload(&self, comment: &[u8]) -> Vec<u8> {
        let mut p = Vec::with_capacity(20 + 7 + comment.len());
        p.push(b'=');
        p.extend_from_slice(&self.latitude);
        p.push(self.symbol_table);
        p.extend_from_slice(&self.longitude);
        p.push(self.symbol);
        if let Some(phg) = self.phg {
            p.extend_from_slice(b"PHG");
            p.push(b'0' + phg.power.min(9));
            p.push(b'0' + phg.height.min(9));
            p.push(b'0' + phg.gain.min(9));
            p.push(b'0' + phg.directivity.min(9));
        }
        p.extend_from_slice(comment);
        p
    }

    /// Build a message payload: `:` + space-padded addressee + `:` +
    /// text + `{` + sequence. Text over 67 characters is truncated.
    /// Each call advances the sequence number, rolling over at 999.
    pub fn message_payload(&mut self, text: &[u8]) -> Result<Vec<u8>> {
        let recipient = self
            .recipient
            .ok_or_else(|| Error::InvalidFrame("no message recipient".into()))?;
        let text = &text[..text.len().min(MAX_MESSAGE_LEN)];
        let mut p = Vec::with_capacity(11 + text.len() + 4);
        p.push(b':');
        let mut addressee = recipient.to_string().into_bytes();
        addressee.resize(9, b' ');
        p.extend_from_slice(&addressee);
        p.push(b':');
        p.extend_from_slice(text);
        self.seq = (self.seq + 1) % 1000;
        p.push(b'{');
        p.extend_from_slice(format!("{}", self.seq).as_bytes());
        Ok(p)
    }

    /// Wrap a payload in a UI frame ready for the engine.
    pub fn frame(&self, info: &[u8]) -> Result<Msg> {
        Msg::new(self.src, self.dst, &self.path, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> Aprs {
        let mut a = Aprs::new(
            "N0CALL-1".parse().unwrap(),
            "APRS".parse().unwrap(),
            &["WIDE1-1".parse().unwrap(), "WIDE2-2".parse().unwrap()],
        );
        a.set_position("4903.50N", "07201.75W").unwrap();
        a
    }

    #[test]
    fn position_layout() {
        let mut a = station();
        a.symbol = b'-';
        let p = a.position_payload(b"Test");
        assert_eq!(p, b"=4903.50N/07201.75W-Test".to_vec());
        // Byte 9 is the symbol table indicator, after the 8-char
        // latitude.
        assert_eq!(p[9], b'/');
        assert_eq!(p[19], b'-');
    }

    #[test]
    fn position_with_phg() {
        let mut a = station();
        a.symbol = b'-';
        a.phg = Some(Phg {
            power: 5,
            height: 3,
            gain: 6,
            directivity: 0,
        });
        let p = a.position_payload(b"");
        assert_eq!(&p[20..27], b"PHG5360");
    }

    #[test]
    fn alternate_table() {
        let mut a = station();
        a.use_alternate_symbol_table(true);
        assert_eq!(a.position_payload(b"")[9], b'\\');
    }

    #[test]
    fn message_layout_and_sequence() -> Result<()> {
        let mut a = station();
        a.recipient = Some("M0XYZ-9".parse().unwrap());
        let p = a.message_payload(b"hello")?;
        assert_eq!(p, b":M0XYZ-9  :hello{1".to_vec());
        let p = a.message_payload(b"again")?;
        assert_eq!(p, b":M0XYZ-9  :again{2".to_vec());
        Ok(())
    }

    #[test]
    fn message_truncated_and_rollover() -> Result<()> {
        let mut a = station();
        a.recipient = Some("M0XYZ".parse().unwrap());
        let long = vec![b'x'; 100];
        let p = a.message_payload(&long)?;
        // ':' + 9 addressee + ':' + 67 text + "{1"
        assert_eq!(p.len(), 1 + 9 + 1 + 67 + 2);
        a.seq = 999;
        let p = a.message_payload(b"wrap")?;
        assert!(p.ends_with(b"{0"));
        Ok(())
    }

    #[test]
    fn no_recipient_errors() {
        let mut a = station();
        assert!(a.message_payload(b"hi").is_err());
    }

    #[test]
    fn frame_builds() -> Result<()> {
        let a = station();
        let msg = a.frame(&a.position_payload(b"Test"))?;
        assert_eq!(msg.info, b"=4903.50N/07201.75WnTest".to_vec());
        Ok(())
    }
}
