//! The machine-readable run report printed on stdout.

use crate::bus::TerminationCause;
use crate::job::{SerialOutFormat, BASE64};
use base64::Engine;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Address of the most recent opcode fetch; absent when the run ended
    /// before any opcode was fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pc: Option<u16>,
    pub num_cycles: u32,
    pub termination_cause: TerminationCause,
    /// Traced cycles as 7-digit uppercase hex strings: type nibble, 16-bit
    /// address, data byte.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_out_data: Option<String>,
}

/// Encode captured serial output as a tagged string in the job's format.
/// Invalid UTF-8 is replaced with U+FFFD rather than emitted raw.
pub fn encode_tagged(format: SerialOutFormat, bytes: &[u8]) -> String {
    match format {
        SerialOutFormat::Utf8 => format!("utf8:{}", String::from_utf8_lossy(bytes)),
        SerialOutFormat::Base64 => format!("base64:{}", BASE64.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_encoding_round_trips_both_formats() {
        assert_eq!(encode_tagged(SerialOutFormat::Utf8, b"Hi"), "utf8:Hi");
        assert_eq!(encode_tagged(SerialOutFormat::Base64, b"Hi"), "base64:SGk=");
        assert_eq!(encode_tagged(SerialOutFormat::Base64, b""), "base64:");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        assert_eq!(encode_tagged(SerialOutFormat::Utf8, &[0x48, 0xFF]), "utf8:H\u{FFFD}");
    }

    #[test]
    fn optional_fields_are_omitted_from_the_json() {
        let report = RunReport {
            last_pc: None,
            num_cycles: 5,
            termination_cause: TerminationCause::Limit,
            cycles: None,
            serial_out_data: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"num_cycles":5,"termination_cause":"limit"}"#);
    }
}
