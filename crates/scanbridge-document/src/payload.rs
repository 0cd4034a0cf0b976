// SPDX-License-Identifier: MIT
//
// Image payload decoding -- captured frames arrive from the mobile browser
// as base64 strings, usually wrapped in a data URL.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use scanbridge_core::error::{Result, ScanbridgeError};

/// Decode an uploaded image payload into raw image bytes.
///
/// Accepts either a bare base64 string or a `data:image/...;base64,`
/// URL as produced by `canvas.toDataURL()`. Anything else is a caller
/// error.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ScanbridgeError::EmptyImagePayload);
    }

    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest.split_once(',').ok_or_else(|| {
                ScanbridgeError::InvalidRequest("data URL without a comma separator".into())
            })?;
            if !meta.ends_with(";base64") {
                return Err(ScanbridgeError::InvalidRequest(format!(
                    "unsupported data URL encoding: {meta}"
                )));
            }
            data
        }
        None => trimmed,
    };

    STANDARD
        .decode(encoded)
        .map_err(|e| ScanbridgeError::InvalidRequest(format!("invalid base64 payload: {e}")))
}
