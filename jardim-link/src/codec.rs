//! Payload encoding for the provisioning characteristic.
//!
//! The firmware exchanges UTF-8 JSON wrapped in standard base64. Reads can
//! observe the characteristic while the device is still writing it, so a
//! [`DecodeError`] usually means "not complete yet" rather than "broken".

use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload is not a status report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode text as base64 over its UTF-8 bytes.
pub fn encode(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

/// Decode base64 back into text.
pub fn decode(value: &str) -> Result<String, DecodeError> {
    let bytes = general_purpose::STANDARD.decode(value.trim())?;
    Ok(String::from_utf8(bytes)?)
}

/// Build the write payload carrying Wi-Fi credentials.
pub fn encode_credentials(ssid: &str, password: &str) -> String {
    let json = serde_json::json!({ "ssid": ssid, "password": password });
    encode(&json.to_string())
}

/// Progress the device reports on the characteristic after a write.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Decode a read payload into a [`StatusReport`].
pub fn decode_report(value: &str) -> Result<StatusReport, DecodeError> {
    let text = decode(value)?;
    Ok(serde_json::from_str(&text)?)
}
