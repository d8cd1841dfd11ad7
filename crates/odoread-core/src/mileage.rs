//! Odometer decoding
//!
//! The COMBI answers the mileage request with a frame like
//! `85 13 51 F9 03 5D 43 85`: header (format, target, source), positive
//! response F9, local id 03, then the counter little-endian in bytes 5 and 6
//! and a checksum. The counter is stored in units of ten miles.

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Numerator/denominator of 1.609344 km per mile, kept integral so the
/// kilometer value truncates exactly
const KM_PER_MILE_NUM: u64 = 1_609_344;
const KM_PER_MILE_DEN: u64 = 1_000_000;

/// Miles per counter step
const MILES_PER_COUNT: u64 = 10;

const COUNTER_LOW_TOKEN: usize = 5;
const COUNTER_HIGH_TOKEN: usize = 6;

/// Odometer value read from the instrument cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MileageReading {
    /// Odometer value in miles, as stored by the cluster
    pub miles: u64,
    /// Whole kilometers, truncated
    pub kilometers: u64,
}

impl MileageReading {
    /// Build a reading from the raw counter value
    pub fn from_counter(counter: u16) -> Self {
        let miles = u64::from(counter) * MILES_PER_COUNT;
        Self {
            miles,
            kilometers: miles_to_km(miles),
        }
    }
}

impl std::fmt::Display for MileageReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} miles, {} kilometers", self.miles, self.kilometers)
    }
}

/// Whole kilometers in `miles`, truncated
pub fn miles_to_km(miles: u64) -> u64 {
    miles * KM_PER_MILE_NUM / KM_PER_MILE_DEN
}

/// Decode a payload starting at the mileage frame header
pub fn decode(payload: &str) -> Result<MileageReading, ProtocolError> {
    let frame = payload.split(['\r', '\n']).next().unwrap_or_default();
    let tokens: Vec<&str> = frame.split(' ').collect();
    if tokens.len() <= COUNTER_HIGH_TOKEN {
        return Err(ProtocolError::UnexpectedPayload(payload.to_string()));
    }

    let high = tokens[COUNTER_HIGH_TOKEN];
    let low = tokens[COUNTER_LOW_TOKEN];
    let is_hex_byte = |t: &str| t.len() == 2 && t.bytes().all(|b| b.is_ascii_hexdigit());
    if !is_hex_byte(high) || !is_hex_byte(low) {
        return Err(ProtocolError::UnexpectedPayload(payload.to_string()));
    }

    let hexvalue = format!("{high}{low}");
    let counter = u16::from_str_radix(&hexvalue, 16)
        .map_err(|_| ProtocolError::UnexpectedPayload(payload.to_string()))?;
    Ok(MileageReading::from_counter(counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_frame() {
        let reading = decode("85 13 51 f9 03 5d 43 85").unwrap();
        assert_eq!(reading.miles, 172450);
        assert_eq!(reading.kilometers, 277531);
        assert_eq!(reading.to_string(), "172450 miles, 277531 kilometers");
    }

    #[test]
    fn test_decode_uppercase_and_trailing_lines() {
        let reading = decode("85 13 51 F9 03 5D 43 85\r\r").unwrap();
        assert_eq!(reading, MileageReading::from_counter(0x435d));
    }

    #[test]
    fn test_decode_needs_seven_tokens() {
        assert!(matches!(
            decode("85 13 51 f9 03 5d"),
            Err(ProtocolError::UnexpectedPayload(_))
        ));
        assert!(decode("85 13 51 f9 03 5d 43").is_ok());
    }

    #[test]
    fn test_decode_rejects_non_hex_counter() {
        assert!(decode("85 13 51 f9 03 zz 43 85").is_err());
        assert!(decode("85 13 51 f9 03 5 43 85").is_err());
    }

    #[test]
    fn test_miles_to_km_truncates() {
        assert_eq!(miles_to_km(0), 0);
        assert_eq!(miles_to_km(10), 16);
        assert_eq!(miles_to_km(1_000_000), 1_609_344);
    }
}
