use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Wire format for published snapshots and inbound commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format. Legacy dashboards only understand this one.
    #[default]
    Json,

    /// CBOR format (compact binary).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Guess the format from the first byte.
///
/// Returns `Json` if the data starts with `{` or `[` (after leading
/// whitespace), otherwise `Cbor`.
pub fn detect_format(data: &[u8]) -> Format {
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode bytes, auto-detecting the format.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, detect_format(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Setpoint {
        wheel_speed: Option<u16>,
        wheel_direction: Option<String>,
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"{\"wheel_speed\": 600}"), Format::Json);
        assert_eq!(detect_format(b"  \n{}"), Format::Json);
        assert_eq!(detect_format(b"[1, 2, 3]"), Format::Json);
        assert_eq!(detect_format(b"\xa1\x63key\x65value"), Format::Cbor);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let value = Setpoint {
            wheel_speed: Some(1200),
            wheel_direction: Some("rev".to_string()),
        };

        let json = encode(&value, Format::Json).unwrap();
        let cbor = encode(&value, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_auto_decode_cbor() {
        let value = Setpoint {
            wheel_speed: Some(750),
            wheel_direction: None,
        };
        let cbor = encode(&value, Format::Cbor).unwrap();

        let decoded: Setpoint = decode_auto(&cbor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_rejects_garbage_json() {
        let result: Result<Setpoint> = decode(b"{not json", Format::Json);
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
