//! Line-oriented `key: value` wire codec
//!
//! A datagram is UTF-8 text, one `key: value` pair per line, with the
//! `message_type` line first. Values are never escaped, so anything nested
//! (pokemon records, boost allocations) travels as single-line JSON.

use std::str::FromStr;

use crate::ParseError;

/// Field carrying the message kind on every datagram
pub const MESSAGE_TYPE: &str = "message_type";

/// A decoded datagram: a flat, ordered mapping of field name to string value.
///
/// Numeric and boolean fields stay strings until a consumer asks for them
/// with [`RawMessage::parse_field`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    fields: Vec<(String, String)>,
}

impl RawMessage {
    /// Start a message of the given type
    pub fn new(message_type: &str) -> Self {
        let mut raw = Self::default();
        raw.insert(MESSAGE_TYPE, message_type);
        raw
    }

    /// The `message_type` field, if present
    pub fn message_type(&self) -> Option<&str> {
        self.get(MESSAGE_TYPE)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a field, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Builder-style [`RawMessage::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a field or fail with [`ParseError::MissingField`]
    pub fn require(&self, key: &str) -> Result<&str, ParseError> {
        self.get(key)
            .ok_or_else(|| ParseError::MissingField(key.to_string()))
    }

    /// Parse a required field into a typed value
    pub fn parse_field<T: FromStr>(&self, key: &str) -> Result<T, ParseError> {
        let value = self.require(key)?;
        value
            .parse()
            .map_err(|_| ParseError::InvalidFormat(format!("invalid {}: {:?}", key, value)))
    }

    /// Parse an optional field; absent is `Ok(None)`, unparseable is an error
    pub fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ParseError> {
        match self.get(key) {
            Some(_) => self.parse_field(key).map(Some),
            None => Ok(None),
        }
    }

    /// Parse a `0`/`1` (or `true`/`false`) flag, absent meaning `false`
    pub fn parse_flag(&self, key: &str) -> Result<bool, ParseError> {
        match self.get(key) {
            None => Ok(false),
            Some("1") | Some("true") | Some("True") => Ok(true),
            Some("0") | Some("false") | Some("False") | Some("") => Ok(false),
            Some(other) => Err(ParseError::InvalidFormat(format!(
                "invalid {}: {:?}",
                key, other
            ))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to wire format, `message_type` first
    pub fn to_wire_format(&self) -> String {
        let mut lines = Vec::with_capacity(self.fields.len());
        if let Some(kind) = self.message_type() {
            lines.push(format!("{}: {}", MESSAGE_TYPE, kind));
        }
        for (key, value) in &self.fields {
            if key != MESSAGE_TYPE {
                lines.push(format!("{}: {}", key, value));
            }
        }
        lines.join("\n")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire_format().into_bytes()
    }
}

/// Encode a message type and its fields into a datagram payload
pub fn encode<'a, I>(message_type: &str, fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut raw = RawMessage::new(message_type);
    for (key, value) in fields {
        if key != MESSAGE_TYPE {
            raw.insert(key, value);
        }
    }
    raw.to_bytes()
}

/// Decode a datagram payload.
///
/// Lines without a colon (or with an empty key) are skipped, never an
/// error. Each line splits on its first colon, so values may contain
/// colons. Later duplicates of a key replace earlier ones.
pub fn decode(bytes: &[u8]) -> RawMessage {
    let text = String::from_utf8_lossy(bytes);
    let mut raw = RawMessage::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        raw.insert(key, value.trim());
    }

    raw
}
