//! Line-based frame codec for the microcontroller serial link.
//!
//! Wire format (ASCII, one frame per line):
//! ```text
//! <header>,<payload>,CRC:<hex4>\r\n
//! ```
//!
//! - `header` and `payload` are opaque colon-delimited `tag:length:value`
//!   tuples.  Neither may contain `,` or a line break.
//! - The trailer carries [`crc16`] of the payload bytes as four upper-case hex
//!   digits.  Older firmware appends `:end` and the `sta` variant sends the
//!   bare digits; [`decode`] accepts all three forms.
//!
//! Decoding never yields a partially-populated frame: any structural problem
//! or CRC disagreement is a [`FrameError`].

use thiserror::Error;

use crate::protocol::crc::crc16;

/// Header sent in front of every payload produced by [`encode`].
pub const DEFAULT_HEADER: &str = "start:1:RPI:USBUart";

/// Separator between the three frame segments.
pub const SEGMENT_SEPARATOR: char = ',';

/// Separator between fields inside a header or payload.
pub const FIELD_SEPARATOR: char = ':';

/// Line terminator appended by the encoder.
pub const LINE_TERMINATOR: &str = "\r\n";

const CRC_TAG: &str = "CRC";
const END_TAG: &str = "end";

/// Errors produced while building or parsing a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The record did not split into exactly `header,payload,trailer`.
    #[error("expected 3 comma-separated segments, found {0}")]
    SegmentCount(usize),

    /// The trailer is not `CRC:XXXX`, `CRC:XXXX:end` or `XXXX`.
    #[error("malformed trailer: {0:?}")]
    MalformedTrailer(String),

    /// The CRC in the trailer does not match the payload.
    #[error("CRC mismatch: trailer says {received:04X}, payload hashes to {computed:04X}")]
    CrcMismatch { received: u16, computed: u16 },

    /// The input is not valid UTF-8 text.
    #[error("frame is not valid text")]
    Encoding,

    /// A header or payload contains a character reserved by the framing.
    #[error("reserved character {0:?} in frame field")]
    ReservedCharacter(char),
}

/// How the CRC trailer is rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailerStyle {
    /// `CRC:XXXX`
    #[default]
    Tagged,
    /// `CRC:XXXX:end`
    TaggedWithEnd,
    /// `XXXX`
    Bare,
}

/// A decoded, CRC-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: String,
    pub payload: String,
    /// CRC16 of `payload`; always consistent for frames built by this module.
    pub crc: u16,
}

impl Frame {
    /// Builds a frame from its header and payload, computing the trailer CRC.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ReservedCharacter`] if either field contains a
    /// segment separator or a line break.
    pub fn new(header: impl Into<String>, payload: impl Into<String>) -> Result<Self, FrameError> {
        let header = header.into();
        let payload = payload.into();
        check_field(&header)?;
        check_field(&payload)?;
        let crc = crc16(payload.as_bytes());
        Ok(Self {
            header,
            payload,
            crc,
        })
    }

    /// Renders the frame without a line terminator.
    pub fn render(&self, style: TrailerStyle) -> String {
        let trailer = match style {
            TrailerStyle::Tagged => format!("{CRC_TAG}:{:04X}", self.crc),
            TrailerStyle::TaggedWithEnd => format!("{CRC_TAG}:{:04X}:{END_TAG}", self.crc),
            TrailerStyle::Bare => format!("{:04X}", self.crc),
        };
        format!(
            "{}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{trailer}",
            self.header, self.payload
        )
    }

    /// Renders the frame as a complete wire line (`CRC:XXXX` trailer + CRLF).
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = self.render(TrailerStyle::Tagged);
        line.push_str(LINE_TERMINATOR);
        line.into_bytes()
    }
}

/// Joins header fields with `:`.
///
/// ```rust
/// use kvmd_core::protocol::frame::header;
///
/// assert_eq!(header(&["start", "1", "RPI", "USBUart"]), "start:1:RPI:USBUart");
/// ```
pub fn header(fields: &[&str]) -> String {
    fields.join(&FIELD_SEPARATOR.to_string())
}

/// Builds a `tag:length:value` payload tuple.
///
/// ```rust
/// use kvmd_core::protocol::frame::payload;
///
/// assert_eq!(payload("15", "50"), "15:2:50");
/// ```
pub fn payload(tag: &str, value: &str) -> String {
    format!("{tag}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{value}", value.len())
}

/// Encodes `payload` behind [`DEFAULT_HEADER`] as one wire line.
///
/// # Errors
///
/// Returns [`FrameError::ReservedCharacter`] if the payload contains `,` or a
/// line break.
///
/// # Examples
///
/// ```rust
/// use kvmd_core::protocol::frame::{decode, encode};
///
/// let bytes = encode("15:2:50").unwrap();
/// assert_eq!(bytes, b"start:1:RPI:USBUart,15:2:50,CRC:F6D2\r\n");
/// assert_eq!(decode(&bytes).unwrap().payload, "15:2:50");
/// ```
pub fn encode(payload: &str) -> Result<Vec<u8>, FrameError> {
    Frame::new(DEFAULT_HEADER, payload).map(|frame| frame.to_line())
}

/// Decodes one line into a CRC-verified [`Frame`].
///
/// A trailing `\n` or `\r\n` is ignored.
///
/// # Errors
///
/// - [`FrameError::Encoding`] if `bytes` is not UTF-8.
/// - [`FrameError::SegmentCount`] unless there are exactly three segments.
/// - [`FrameError::MalformedTrailer`] if the trailer cannot be parsed.
/// - [`FrameError::CrcMismatch`] if the CRC disagrees with the payload.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FrameError::Encoding)?;
    let line = text
        .strip_suffix('\n')
        .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
        .unwrap_or(text);

    let segments: Vec<&str> = line.split(SEGMENT_SEPARATOR).collect();
    let [header, payload, trailer] = segments.as_slice() else {
        return Err(FrameError::SegmentCount(segments.len()));
    };

    let received = parse_trailer(trailer)?;
    let computed = crc16(payload.as_bytes());
    if received != computed {
        return Err(FrameError::CrcMismatch { received, computed });
    }

    Ok(Frame {
        header: (*header).to_string(),
        payload: (*payload).to_string(),
        crc: computed,
    })
}

fn parse_trailer(trailer: &str) -> Result<u16, FrameError> {
    let malformed = || FrameError::MalformedTrailer(trailer.to_string());

    let digits = match trailer.split(FIELD_SEPARATOR).collect::<Vec<_>>().as_slice() {
        [digits] => *digits,
        [CRC_TAG, digits] => *digits,
        [CRC_TAG, digits, END_TAG] => *digits,
        _ => return Err(malformed()),
    };

    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    u16::from_str_radix(digits, 16).map_err(|_| malformed())
}

fn check_field(field: &str) -> Result<(), FrameError> {
    match field
        .chars()
        .find(|c| *c == SEGMENT_SEPARATOR || *c == '\r' || *c == '\n')
    {
        Some(c) => Err(FrameError::ReservedCharacter(c)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_header_payload_trailer_line() {
        let bytes = encode("15:2:50").unwrap();
        assert_eq!(bytes, b"start:1:RPI:USBUart,15:2:50,CRC:F6D2\r\n".to_vec());
    }

    #[test]
    fn test_decode_accepts_all_trailer_styles() {
        let frame = Frame::new("sta:2", "FF:4:0010").unwrap();
        for style in [
            TrailerStyle::Tagged,
            TrailerStyle::TaggedWithEnd,
            TrailerStyle::Bare,
        ] {
            let decoded = decode(frame.render(style).as_bytes()).unwrap();
            assert_eq!(decoded, frame, "style {style:?}");
        }
    }

    #[test]
    fn test_decode_accepts_lowercase_hex() {
        let decoded = decode(b"sta:2,FF:4:0010,CRC:f8e6\n").unwrap();
        assert_eq!(decoded.crc, 0xF8E6);
    }

    #[test]
    fn test_decode_rejects_crc_mismatch() {
        let result = decode(b"start:1:RPI:USBUart,15:2:50,CRC:0000\r\n");
        assert_eq!(
            result,
            Err(FrameError::CrcMismatch {
                received: 0x0000,
                computed: 0xF6D2,
            })
        );
    }

    #[test]
    fn test_decode_rejects_two_segments() {
        assert_eq!(decode(b"15:2:50,CRC:F6D2"), Err(FrameError::SegmentCount(2)));
    }

    #[test]
    fn test_decode_rejects_four_segments() {
        assert_eq!(
            decode(b"a,15:2:50,CRC:F6D2,extra"),
            Err(FrameError::SegmentCount(4))
        );
    }

    #[test]
    fn test_decode_rejects_short_crc() {
        assert!(matches!(
            decode(b"h,15:2:50,CRC:F6D"),
            Err(FrameError::MalformedTrailer(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_trailer_tag() {
        assert!(matches!(
            decode(b"h,15:2:50,SUM:F6D2"),
            Err(FrameError::MalformedTrailer(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(decode(&[0xFF, 0xFE, b',', b',']), Err(FrameError::Encoding));
    }

    #[test]
    fn test_encode_rejects_comma_in_payload() {
        assert_eq!(encode("a,b"), Err(FrameError::ReservedCharacter(',')));
    }

    #[test]
    fn test_encode_rejects_newline_in_payload() {
        assert_eq!(encode("a\nb"), Err(FrameError::ReservedCharacter('\n')));
    }

    #[test]
    fn test_payload_counts_value_length() {
        assert_eq!(payload("15", "0010"), "15:4:0010");
        assert_eq!(payload("15", ""), "15:0:");
    }

    #[test]
    fn test_header_joins_fields() {
        assert_eq!(header(&["sta", "2"]), "sta:2");
    }
}
