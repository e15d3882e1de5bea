use serde::{Deserialize, Serialize};

use crate::error::TagParseError;

const STATUS_OK: [u8; 2] = [0x90, 0x00];
const STATUS_NOT_FOUND: [u8; 2] = [0x6A, 0x82];

/// Network identity of one zone controller, as carried by its tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    pub zone_id: String,
    pub api_base: String,
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ZoneConfig {
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

/// Parses a `key=value;key=value` tag payload.
pub fn parse_tag(raw: &str, default_password: &str) -> Result<ZoneConfig, TagParseError> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    if cleaned.trim().is_empty() {
        return Err(TagParseError::Empty);
    }

    let mut zone_id = None;
    let mut api_base = None;
    let mut ssid = None;
    let mut password = None;

    for segment in cleaned.split(';') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "zoneid" => zone_id = Some(value),
            "apibase" => api_base = Some(value),
            "ssid" => ssid = Some(value),
            "password" => password = Some(value),
            _ => {}
        }
    }

    let ssid = required(ssid, "ssid")?;
    let api_base = required(api_base, "apiBase")?;
    let zone_id = required(zone_id, "zoneId")?;

    if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
        return Err(TagParseError::InvalidApiBase(api_base));
    }

    let password = password
        .filter(|value| !value.is_empty())
        .or_else(|| (!default_password.is_empty()).then(|| default_password.to_string()));

    Ok(ZoneConfig {
        zone_id,
        api_base: api_base.trim_end_matches('/').to_string(),
        ssid,
        password,
    })
}

fn required(value: Option<String>, key: &'static str) -> Result<String, TagParseError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or(TagParseError::MissingKey(key))
}

/// Turns a raw tag response into payload text, dropping the ISO 7816
/// status word when present.
pub fn decode_tag_response(bytes: &[u8]) -> Result<String, TagParseError> {
    if bytes == STATUS_NOT_FOUND {
        return Err(TagParseError::ApplicationNotFound);
    }

    let payload = match bytes.len().checked_sub(2) {
        Some(split) if bytes[split..] == STATUS_OK => &bytes[..split],
        _ => bytes,
    };

    if payload.is_empty() {
        return Err(TagParseError::Empty);
    }
    Ok(String::from_utf8_lossy(payload).into_owned())
}
