//! Application messages carried in text frames.

use bytes::Bytes;
use serde_json::Value;
use std::cell::OnceCell;

use super::error::DecodeError;

/// A message above the frame layer: raw payload bytes plus a JSON value
/// parsed on first access.
///
/// Decoding failures surface as `DecodeError` values from [`text`] and
/// [`json`] rather than at construction time.
///
/// [`text`]: ApplicationMessage::text
/// [`json`]: ApplicationMessage::json
#[derive(Debug, Clone)]
pub struct ApplicationMessage {
    raw: Bytes,
    value: OnceCell<Value>,
}

impl ApplicationMessage {
    pub fn from_bytes(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            value: OnceCell::new(),
        }
    }

    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, DecodeError> {
        Ok(std::str::from_utf8(&self.raw)?)
    }

    /// Payload parsed as JSON, cached after the first successful parse.
    pub fn json(&self) -> Result<&Value, DecodeError> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let value = serde_json::from_str(self.text()?)?;
        Ok(self.value.get_or_init(|| value))
    }
}

impl From<String> for ApplicationMessage {
    fn from(text: String) -> Self {
        Self::from_bytes(text.into_bytes())
    }
}

impl From<&'static str> for ApplicationMessage {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl PartialEq for ApplicationMessage {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ApplicationMessage {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_message() {
        let msg = ApplicationMessage::from(r#"{"message":"hi"}"#);
        assert_eq!(msg.text().unwrap(), r#"{"message":"hi"}"#);
        assert_eq!(msg.json().unwrap(), &json!({"message": "hi"}));
        // Second access hits the cache
        assert_eq!(msg.json().unwrap()["message"], "hi");
    }

    #[test]
    fn test_invalid_utf8() {
        let msg = ApplicationMessage::from_bytes(vec![b'"', 0xc3, 0x28, b'"']);
        assert!(matches!(msg.text(), Err(DecodeError::Utf8(_))));
        assert!(matches!(msg.json(), Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn test_invalid_json() {
        let msg = ApplicationMessage::from("hello");
        assert_eq!(msg.text().unwrap(), "hello");
        assert!(matches!(msg.json(), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_empty_message() {
        let msg = ApplicationMessage::from_bytes(Bytes::new());
        assert!(msg.as_bytes().is_empty());
        assert_eq!(msg.text().unwrap(), "");
        assert!(msg.json().is_err());
    }
}
