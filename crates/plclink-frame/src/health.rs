//! `PH` health response parsing.
//!
//! The response carries sequential big-endian u32 fields as hex after a `PH`
//! marker. Only the first six fields are guaranteed; every later field is
//! decoded when its eight hex characters are present.

use serde::Serialize;

use crate::command::FIELD_HEX_WIDTH;
use crate::error::{FrameError, Result};
use crate::response::is_error_response;

/// Marker preceding the health fields.
pub const HEALTH_MARKER: &str = "PH";

/// Number of fields that must be present.
pub const MANDATORY_FIELDS: usize = 6;

/// Minimum hex characters after the marker.
pub const MIN_HEALTH_HEX: usize = MANDATORY_FIELDS * FIELD_HEX_WIDTH;

/// Total fields the firmware may report.
pub const MAX_FIELDS: usize = 13;

/// Runtime health counters reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthStats {
    pub last_cycle_us: u32,
    pub min_cycle_us: u32,
    pub max_cycle_us: u32,
    pub ram_free: u32,
    pub ram_free_min: u32,
    pub ram_free_max: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ram: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_period_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_period_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_period_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_jitter_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_jitter_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_jitter_us: Option<u32>,
}

/// Parse a health response line.
///
/// Noise before the `PH` marker is skipped.
pub fn parse_health(text: &str) -> Result<HealthStats> {
    let text = text.trim();
    if is_error_response(text) {
        return Err(FrameError::DeviceError(text.to_string()));
    }

    let start = text.find(HEALTH_MARKER).ok_or_else(|| {
        FrameError::MalformedResponse(format!("missing {HEALTH_MARKER} marker in health response"))
    })?;
    let digits: &str = {
        let after = &text[start + HEALTH_MARKER.len()..];
        let len = after
            .bytes()
            .take_while(u8::is_ascii_hexdigit)
            .count()
            .min(MAX_FIELDS * FIELD_HEX_WIDTH);
        &after[..len]
    };

    if digits.len() < MIN_HEALTH_HEX {
        return Err(FrameError::HealthTooShort {
            len: digits.len(),
            min: MIN_HEALTH_HEX,
        });
    }

    let fields: Vec<u32> = digits
        .as_bytes()
        .chunks_exact(FIELD_HEX_WIDTH)
        .map(|chunk| {
            // chunk is ASCII hex by construction
            let text = std::str::from_utf8(chunk).unwrap_or("0");
            u32::from_str_radix(text, 16).unwrap_or(0)
        })
        .collect();

    let at = |index: usize| fields.get(index).copied();
    Ok(HealthStats {
        last_cycle_us: fields[0],
        min_cycle_us: fields[1],
        max_cycle_us: fields[2],
        ram_free: fields[3],
        ram_free_min: fields[4],
        ram_free_max: fields[5],
        total_ram: at(6),
        last_period_us: at(7),
        min_period_us: at(8),
        max_period_us: at(9),
        last_jitter_us: at(10),
        min_jitter_us: at(11),
        max_jitter_us: at(12),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_hex(values: &[u32]) -> String {
        values.iter().map(|v| format!("{v:08X}")).collect()
    }

    #[test]
    fn parses_all_thirteen_fields() {
        let values: Vec<u32> = (1..=13).map(|v| v * 100).collect();
        let stats = parse_health(&format!("PH{}\n", fields_hex(&values))).unwrap();
        assert_eq!(stats.last_cycle_us, 100);
        assert_eq!(stats.ram_free_max, 600);
        assert_eq!(stats.total_ram, Some(700));
        assert_eq!(stats.max_jitter_us, Some(1300));
    }

    #[test]
    fn minimum_response_leaves_trailing_fields_absent() {
        let stats = parse_health(&format!("PH{}", fields_hex(&[1, 2, 3, 4, 5, 6]))).unwrap();
        assert_eq!(stats.ram_free_max, 6);
        assert_eq!(stats.total_ram, None);
        assert_eq!(stats.last_jitter_us, None);
    }

    #[test]
    fn partial_trailing_field_is_ignored() {
        let text = format!("PH{}ABC", fields_hex(&[1, 2, 3, 4, 5, 6, 7]));
        let stats = parse_health(&text).unwrap();
        assert_eq!(stats.total_ram, Some(7));
        assert_eq!(stats.last_period_us, None);
    }

    #[test]
    fn skips_leading_noise() {
        let text = format!("\u{0}xx OK PH{}", fields_hex(&[9; 12]));
        let stats = parse_health(&text).unwrap();
        assert_eq!(stats.last_cycle_us, 9);
        assert_eq!(stats.min_jitter_us, Some(9));
        assert_eq!(stats.max_jitter_us, None);
    }

    #[test]
    fn too_short_is_rejected() {
        let text = format!("PH{}", fields_hex(&[1, 2, 3, 4, 5]));
        assert!(matches!(
            parse_health(&text),
            Err(FrameError::HealthTooShort { len: 40, min: 48 })
        ));
    }

    #[test]
    fn missing_marker_is_malformed() {
        assert!(matches!(
            parse_health("OK 00000000"),
            Err(FrameError::MalformedResponse(_))
        ));
    }

    #[test]
    fn error_response_is_device_error() {
        assert!(matches!(
            parse_health("ERR busy"),
            Err(FrameError::DeviceError(_))
        ));
    }
}
