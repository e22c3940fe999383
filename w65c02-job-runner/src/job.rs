//! The declarative job schema read from stdin.
//!
//! Everything here is configuration-time: schema validation and payload
//! decoding happen before the CPU runs a single cycle, and any failure is a
//! configuration error (exit 1), never a partial result.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

/// Standard alphabet with `=` padding on encode; decode tolerates missing
/// padding so hand-written jobs don't need to count bytes.
pub(crate) const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to parse job: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown data format in {0:?}")]
    UnknownDataFormat(String),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("empty init record at base {base:#06X}")]
    EmptyInitRecord { base: u16 },
    #[error("RDY signal is not supported")]
    RdyUnsupported,
    #[error("reset signal is not supported")]
    ResUnsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialOutFormat {
    Utf8,
    Base64,
}

/// A memory seed record. When `size` is present exactly that many bytes are
/// written, cycling through `data` as needed.
#[derive(Debug, Clone, Deserialize)]
pub struct InitRecord {
    pub base: u16,
    pub data: String,
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobDescription {
    #[serde(default)]
    pub init: Vec<InitRecord>,
    pub rwmap: Option<Vec<(u16, u16)>>,
    pub serial_in_addr: Option<u16>,
    pub serial_in_data: Option<String>,
    pub serial_out_addr: Option<u16>,
    pub serial_out_fmt: Option<SerialOutFormat>,
    #[serde(default)]
    pub show_cycles: bool,
    pub max_cycles: Option<u32>,
    pub terminate_on_brk: Option<bool>,
    pub terminate_on_infinite_loop: Option<bool>,
    pub terminate_on_zero_fetch: Option<bool>,
    pub terminate_on_stack_fetch: Option<bool>,
    pub terminate_on_vector_fetch: Option<bool>,
    pub terminate_on_bad_write: Option<bool>,
    pub so: Option<Vec<u32>>,
    pub nmi: Option<Vec<u32>>,
    pub irq: Option<Vec<u32>>,
    // Accepted by the schema only so that requesting them is a clean error
    pub rdy: Option<serde_json::Value>,
    pub res: Option<serde_json::Value>,
}

impl JobDescription {
    pub fn from_json(json: &str) -> Result<Self, JobError> {
        let job: Self = serde_json::from_str(json)?;
        job.validate()?;
        Ok(job)
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.rdy.as_ref().is_some_and(|value| !value.is_null()) {
            return Err(JobError::RdyUnsupported);
        }
        if self.res.as_ref().is_some_and(|value| !value.is_null()) {
            return Err(JobError::ResUnsupported);
        }
        Ok(())
    }
}

/// Decode a `utf8:`/`base64:`-tagged payload into raw bytes.
pub fn decode_tagged(source: &str) -> Result<Vec<u8>, JobError> {
    if let Some(raw) = source.strip_prefix("utf8:") {
        Ok(raw.as_bytes().to_vec())
    } else if let Some(encoded) = source.strip_prefix("base64:") {
        Ok(BASE64.decode(encoded)?)
    } else {
        let prefix: String = source.chars().take(16).collect();
        Err(JobError::UnknownDataFormat(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_data_decodes_both_formats() {
        assert_eq!(decode_tagged("utf8:Hi").unwrap(), b"Hi");
        assert_eq!(decode_tagged("base64:SGk=").unwrap(), b"Hi");
        assert_eq!(decode_tagged("base64:SGk").unwrap(), b"Hi", "unpadded input is accepted");
        assert_eq!(decode_tagged("utf8:").unwrap(), b"");
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(matches!(decode_tagged("hex:00"), Err(JobError::UnknownDataFormat(_))));
        assert!(matches!(decode_tagged("SGk="), Err(JobError::UnknownDataFormat(_))));
    }

    #[test]
    fn garbage_base64_is_rejected() {
        assert!(matches!(decode_tagged("base64:@@@"), Err(JobError::InvalidBase64(_))));
    }

    #[test]
    fn rdy_and_res_are_rejected_for_any_non_null_value() {
        assert!(matches!(
            JobDescription::from_json(r#"{"rdy": true}"#),
            Err(JobError::RdyUnsupported)
        ));
        assert!(matches!(
            JobDescription::from_json(r#"{"rdy": false}"#),
            Err(JobError::RdyUnsupported)
        ));
        assert!(matches!(
            JobDescription::from_json(r#"{"res": [5]}"#),
            Err(JobError::ResUnsupported)
        ));
        assert!(JobDescription::from_json(r#"{"rdy": null}"#).is_ok());
    }

    #[test]
    fn unknown_serial_out_fmt_is_a_parse_error() {
        assert!(matches!(
            JobDescription::from_json(r#"{"serial_out_fmt": "hex"}"#),
            Err(JobError::Parse(_))
        ));
    }

    #[test]
    fn defaults_are_permissive() {
        let job = JobDescription::from_json("{}").unwrap();
        assert!(job.init.is_empty());
        assert!(job.rwmap.is_none());
        assert!(!job.show_cycles);
        assert!(job.max_cycles.is_none());
    }
}
