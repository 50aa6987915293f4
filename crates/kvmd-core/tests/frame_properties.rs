//! Integration tests for the frame codec's public guarantees.
//!
//! Two properties matter to the daemon:
//!
//! 1. Whatever payload the encoder accepts, the decoder returns unchanged.
//! 2. A frame whose payload was corrupted in any single character never
//!    decodes successfully.

use kvmd_core::protocol::frame::{decode, encode, payload, FrameError};
use kvmd_core::{BatteryProtocol, StaProtocol, StartProtocol};

/// Payloads seen on real links plus a few awkward edge shapes.
fn sample_payloads() -> Vec<String> {
    let mut payloads = vec![
        String::new(),
        "15:2:50".to_string(),
        "FF:4:0010".to_string(),
        "bcfg boot mv 2 0".to_string(),
        "x".repeat(200),
        "tag:with:many:colons:and spaces".to_string(),
        "\t\u{7f}~!@#$%^&*()".to_string(),
    ];
    for percent in [0u8, 1, 33, 99, 100] {
        payloads.push(payload("15", &percent.to_string()));
    }
    payloads
}

#[test]
fn test_decode_returns_encoded_payload() {
    for original in sample_payloads() {
        let bytes = encode(&original).expect("encode must accept the payload");
        let frame = decode(&bytes).expect("decode must accept its own output");
        assert_eq!(frame.payload, original);
    }
}

#[test]
fn test_single_character_mutation_is_rejected() {
    // Arrange
    let replacements = ['0', 'Z', ':', ' ', ',', '\u{7f}'];

    for original in sample_payloads() {
        let bytes = encode(&original).expect("encode must succeed");
        let line = String::from_utf8(bytes).expect("frames are ASCII");
        let payload_start = line.find(',').expect("header separator") + 1;

        for offset in 0..original.len() {
            for replacement in replacements {
                let index = payload_start + offset;
                if line.as_bytes()[index] == replacement as u8 {
                    continue;
                }

                // Act
                let mut mutated = line.clone().into_bytes();
                mutated[index] = replacement as u8;
                let result = decode(&mutated);

                // Assert
                assert!(
                    result.is_err(),
                    "mutation {replacement:?} at {offset} of {original:?} decoded"
                );
            }
        }
    }
}

#[test]
fn test_truncated_line_is_rejected() {
    let bytes = encode("15:2:50").expect("encode must succeed");
    let truncated = &bytes[..bytes.len() - 4];

    assert!(matches!(
        decode(truncated),
        Err(FrameError::MalformedTrailer(_))
    ));
}

#[test]
fn test_battery_frames_are_valid_frames() {
    for percent in [0u8, 42, 100] {
        let start = StartProtocol.encode_percent(percent).expect("start frame");
        assert!(decode(&start).is_ok(), "start frame for {percent}%");

        // The sta firmware expects a 3-byte command prefix before the frame.
        let sta = StaProtocol.encode_percent(percent).expect("sta frame");
        assert!(decode(&sta[3..]).is_ok(), "sta frame for {percent}%");
    }
}
