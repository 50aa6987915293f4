//! Streamer parameter validation.
//!
//! `POST /api/streamer/<name>/set_params` accepts a fixed set of query keys.
//! Each value is parsed by its validator; a key the streamer does not report
//! in its current parameters is unsupported on this hardware, and a value
//! equal to the current one is not staged at all.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// Parameter map as reported by a stream pipeline.
pub type StreamParams = Map<String, Value>;

/// Errors produced while staging a parameter change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter {0:?} is not supported by this streamer")]
    Unsupported(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

type Validator = fn(&str, &str) -> Result<Value, ParamError>;

const VALIDATORS: &[(&str, Validator)] = &[
    ("quality", quality),
    ("desired_fps", desired_fps),
    ("resolution", resolution),
    ("h264_bitrate", h264_bitrate),
    ("h264_gop", h264_gop),
];

fn quality(key: &str, raw: &str) -> Result<Value, ParamError> {
    ranged_int(key, raw, 1, 100)
}

fn desired_fps(key: &str, raw: &str) -> Result<Value, ParamError> {
    ranged_int(key, raw, 0, 120)
}

fn h264_bitrate(key: &str, raw: &str) -> Result<Value, ParamError> {
    ranged_int(key, raw, 25, 20_000)
}

fn h264_gop(key: &str, raw: &str) -> Result<Value, ParamError> {
    ranged_int(key, raw, 0, 60)
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ParamError {
    ParamError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn ranged_int(key: &str, raw: &str, min: i64, max: i64) -> Result<Value, ParamError> {
    let parsed: i64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(key, raw, "not an integer"))?;
    if !(min..=max).contains(&parsed) {
        return Err(invalid(key, raw, format!("must be in {min}..={max}")));
    }
    Ok(Value::from(parsed))
}

fn resolution(key: &str, raw: &str) -> Result<Value, ParamError> {
    let bad = || invalid(key, raw, "expected WIDTHxHEIGHT");
    let (width, height) = raw.trim().split_once(['x', 'X']).ok_or_else(bad)?;
    let width: u32 = width.parse().map_err(|_| bad())?;
    let height: u32 = height.parse().map_err(|_| bad())?;
    if width == 0 || height == 0 {
        return Err(bad());
    }
    Ok(Value::from(format!("{width}x{height}")))
}

/// Validates `requested` against the streamer's `current` parameters and
/// returns only the values that actually change.
///
/// Keys outside the known set are ignored.
///
/// # Errors
///
/// [`ParamError::Unsupported`] if a known key is missing from `current`, or
/// [`ParamError::Invalid`] if a value fails its validator.
pub fn stage_params(
    current: &StreamParams,
    requested: &HashMap<String, String>,
) -> Result<StreamParams, ParamError> {
    let mut staged = StreamParams::new();
    for (key, validator) in VALIDATORS {
        let Some(raw) = requested.get(*key) else {
            continue;
        };
        if !current.contains_key(*key) {
            return Err(ParamError::Unsupported((*key).to_string()));
        }
        let value = validator(key, raw)?;
        if current.get(*key) != Some(&value) {
            staged.insert((*key).to_string(), value);
        }
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn current() -> StreamParams {
        json!({"quality": 80, "desired_fps": 30, "resolution": "1920x1080"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_changed_values_are_staged() {
        let raw = query(&[("quality", "50"), ("resolution", "1280x720")]);
        let staged = stage_params(&current(), &raw).unwrap();
        assert_eq!(staged.get("quality"), Some(&json!(50)));
        assert_eq!(staged.get("resolution"), Some(&json!("1280x720")));
    }

    #[test]
    fn test_unchanged_values_are_not_staged() {
        let raw = query(&[("quality", "80"), ("desired_fps", "30")]);
        let staged = stage_params(&current(), &raw).unwrap();
        assert!(staged.is_empty());
    }

    #[test]
    fn test_out_of_range_quality_rejected() {
        let result = stage_params(&current(), &query(&[("quality", "0")]));
        assert!(matches!(result, Err(ParamError::Invalid { .. })));
    }

    #[test]
    fn test_non_numeric_fps_rejected() {
        let result = stage_params(&current(), &query(&[("desired_fps", "fast")]));
        assert!(matches!(result, Err(ParamError::Invalid { .. })));
    }

    #[test]
    fn test_malformed_resolution_rejected() {
        for raw in ["1920", "x1080", "0x0", "axb"] {
            let result = stage_params(&current(), &query(&[("resolution", raw)]));
            assert!(matches!(result, Err(ParamError::Invalid { .. })), "{raw}");
        }
    }

    #[test]
    fn test_h264_key_missing_from_current_is_unsupported() {
        let result = stage_params(&current(), &query(&[("h264_bitrate", "5000")]));
        assert_eq!(result, Err(ParamError::Unsupported("h264_bitrate".to_string())));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let staged = stage_params(&current(), &query(&[("brightness", "3")])).unwrap();
        assert!(staged.is_empty());
    }
}
