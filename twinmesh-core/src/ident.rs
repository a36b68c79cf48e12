//! Identifier encoding for URL path segments
//!
//! Remote registries address single records by the base64url encoding of
//! their id. Encoding is unpadded; decoding accepts both forms.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::RecordError;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode a record id for use in a URL path.
pub fn encode_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Decode a base64url path segment back into a record id.
pub fn decode_id(encoded: &str) -> Result<String, RecordError> {
    let bytes = URL_SAFE_LENIENT
        .decode(encoded.trim())
        .map_err(|e| RecordError::InvalidField {
            field: "id".to_string(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| RecordError::InvalidField {
        field: "id".to_string(),
        reason: e.to_string(),
    })
}
