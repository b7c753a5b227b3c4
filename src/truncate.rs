//! Size-bounded rendering of captured bodies.
//!
//! Captured request and response bodies are turned into display text here. A body within
//! its byte limit is decoded with the configured [`TextEncoding`]; a body over the limit is
//! replaced by the policy's placeholder (or, in [`TruncationMode::Prefix`], cut down to the
//! limit with the placeholder appended).
//!
//! Everything in this module is a pure function of its inputs.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Default byte limit for request bodies.
pub const DEFAULT_REQUEST_BODY_LIMIT: usize = 2048;
/// Default byte limit for response bodies.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 3072;
/// Default text used in place of an oversize body.
pub const DEFAULT_PLACEHOLDER: &str = "the response is too large";

/// Text encoding used to turn body bytes into display text.
///
/// `Hex` and `Base64` never fail; the other encodings decode lossily, substituting
/// `U+FFFD` for anything they cannot represent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "utf-16le", alias = "ucs2", alias = "ucs-2")]
    Utf16le,
    #[serde(alias = "binary")]
    Latin1,
    Ascii,
    Hex,
    Base64,
}

impl TextEncoding {
    /// Decode `bytes` into display text. Never fails.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16le => {
                let units = bytes
                    .chunks(2)
                    .map(|pair| match pair {
                        [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                        // A dangling odd byte can't form a code unit
                        _ => 0xFFFD,
                    });
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Ascii => bytes.iter().map(|&b| char::from(b & 0x7f)).collect(),
            TextEncoding::Hex => hex::encode(bytes),
            TextEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Length of the longest prefix of `bytes[..limit]` that does not split a character.
    fn prefix_len(self, bytes: &[u8], limit: usize) -> usize {
        let limit = limit.min(bytes.len());
        match self {
            TextEncoding::Utf8 => match std::str::from_utf8(&bytes[..limit]) {
                Ok(_) => limit,
                // Only back off when the cut landed inside a multi-byte sequence
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => limit,
            },
            TextEncoding::Utf16le => limit - limit % 2,
            _ => limit,
        }
    }

    /// The canonical name of this encoding, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf8",
            TextEncoding::Utf16le => "utf16le",
            TextEncoding::Latin1 => "latin1",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Hex => "hex",
            TextEncoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown encoding name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported text encoding: {0}")]
pub struct UnknownEncoding(pub String);

impl FromStr for TextEncoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Ok(TextEncoding::Utf16le),
            "latin1" | "binary" => Ok(TextEncoding::Latin1),
            "ascii" => Ok(TextEncoding::Ascii),
            "hex" => Ok(TextEncoding::Hex),
            "base64" => Ok(TextEncoding::Base64),
            _ => Err(UnknownEncoding(s.to_owned())),
        }
    }
}

/// What happens to a body that exceeds its limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationMode {
    /// The whole body is replaced by the placeholder. No content is retained.
    #[default]
    Replace,
    /// The first `limit` bytes are kept and the placeholder is appended.
    Prefix,
}

impl FromStr for TruncationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(TruncationMode::Replace),
            "prefix" => Ok(TruncationMode::Prefix),
            other => Err(format!("unknown truncation mode: {other}")),
        }
    }
}

/// Byte limits and display rules applied to every captured body.
///
/// A policy is resolved once at startup and then shared read-only by all in-flight
/// captures, usually behind an `Arc`.
///
/// # Examples
///
/// ```rust
/// use request_curl::TruncationPolicy;
///
/// let policy = TruncationPolicy {
///     request_body_limit: 4,
///     ..TruncationPolicy::default()
/// };
///
/// assert_eq!(policy.request_body(b"ping").as_deref(), Some("ping"));
/// assert_eq!(
///     policy.request_body(b"pong!").as_deref(),
///     Some("the response is too large")
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationPolicy {
    /// Maximum request body size, in bytes, that is rendered in full
    pub request_body_limit: usize,
    /// Maximum response body size, in bytes, that is rendered in full
    pub response_body_limit: usize,
    /// Text substituted for a body over its limit
    pub placeholder: String,
    /// Encoding used to decode bodies for display
    pub encoding: TextEncoding,
    /// How oversize bodies are handled
    pub mode: TruncationMode,
    /// Drop the `--data-raw` flag entirely for oversize request bodies
    pub omit_oversize_request_body: bool,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            request_body_limit: DEFAULT_REQUEST_BODY_LIMIT,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            placeholder: DEFAULT_PLACEHOLDER.to_owned(),
            encoding: TextEncoding::Utf8,
            mode: TruncationMode::Replace,
            omit_oversize_request_body: false,
        }
    }
}

impl TruncationPolicy {
    /// Display text for a request body, or `None` when there is nothing to render.
    ///
    /// An empty body yields `None`, as does an oversize body when
    /// [`omit_oversize_request_body`](Self::omit_oversize_request_body) is set.
    pub fn request_body(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        if bytes.len() > self.request_body_limit && self.omit_oversize_request_body {
            return None;
        }
        Some(self.apply(bytes, self.request_body_limit))
    }

    /// Text standing in for a request body that cannot be reproduced, or `None` when
    /// [`omit_oversize_request_body`](Self::omit_oversize_request_body) drops it.
    pub fn request_placeholder(&self) -> Option<String> {
        (!self.omit_oversize_request_body).then(|| self.placeholder.clone())
    }

    /// Display text for a response body.
    pub fn response_body(&self, bytes: &[u8]) -> String {
        self.apply(bytes, self.response_body_limit)
    }

    /// Response-side limit applied to already-decoded text, such as an error description.
    pub fn response_text(&self, text: &str) -> String {
        if text.len() <= self.response_body_limit {
            return text.to_owned();
        }
        truncate_with(
            text.as_bytes(),
            self.response_body_limit,
            TextEncoding::Utf8,
            &self.placeholder,
            self.mode,
        )
    }

    fn apply(&self, bytes: &[u8], limit: usize) -> String {
        truncate_with(bytes, limit, self.encoding, &self.placeholder, self.mode)
    }
}

/// Decode `bytes` if they fit in `limit`, otherwise return `placeholder` verbatim.
///
/// No partial content survives an oversize body.
pub fn truncate(bytes: &[u8], limit: usize, encoding: TextEncoding, placeholder: &str) -> String {
    if bytes.len() <= limit {
        encoding.decode(bytes)
    } else {
        placeholder.to_owned()
    }
}

/// Decode `bytes` if they fit in `limit`, otherwise decode the first `limit` bytes and
/// append `placeholder`.
///
/// The cut never splits a UTF-8 or UTF-16 character.
pub fn truncate_prefix(
    bytes: &[u8],
    limit: usize,
    encoding: TextEncoding,
    placeholder: &str,
) -> String {
    if bytes.len() <= limit {
        return encoding.decode(bytes);
    }
    let cut = encoding.prefix_len(bytes, limit);
    let mut text = encoding.decode(&bytes[..cut]);
    text.push_str(placeholder);
    text
}

fn truncate_with(
    bytes: &[u8],
    limit: usize,
    encoding: TextEncoding,
    placeholder: &str,
    mode: TruncationMode,
) -> String {
    match mode {
        TruncationMode::Replace => truncate(bytes, limit, encoding, placeholder),
        TruncationMode::Prefix => truncate_prefix(bytes, limit, encoding, placeholder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_limit_decodes_unchanged() {
        let body = br#"{"ok":true}"#;
        assert_eq!(
            truncate(body, 3072, TextEncoding::Utf8, "too large"),
            r#"{"ok":true}"#
        );
        // Exactly at the limit still counts as fitting
        assert_eq!(truncate(b"abc", 3, TextEncoding::Utf8, "too large"), "abc");
    }

    #[test]
    fn test_over_limit_is_placeholder_only() {
        let body = vec![b'x'; 5000];
        assert_eq!(
            truncate(&body, 2048, TextEncoding::Utf8, "the response is too large"),
            "the response is too large"
        );
        assert_eq!(truncate(b"abcd", 3, TextEncoding::Hex, "<big>"), "<big>");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let text = truncate(&[b'h', b'i', 0xff, 0xfe], 10, TextEncoding::Utf8, "-");
        assert_eq!(text, "hi\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn test_encodings() {
        assert_eq!(TextEncoding::Hex.decode(b"\x01\xab"), "01ab");
        assert_eq!(TextEncoding::Base64.decode(b"hello"), "aGVsbG8=");
        assert_eq!(TextEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(TextEncoding::Ascii.decode(&[0xc1, 0x42]), "AB");
        assert_eq!(TextEncoding::Utf16le.decode(&[0x68, 0x00, 0x69, 0x00]), "hi");
        assert_eq!(TextEncoding::Utf16le.decode(&[0x68, 0x00, 0x69]), "h\u{FFFD}");
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("utf-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("BINARY".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert_eq!("ucs2".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16le);
        assert!("ebcdic".parse::<TextEncoding>().is_err());
        assert_eq!(TextEncoding::Base64.to_string(), "base64");
    }

    #[test]
    fn test_prefix_mode_keeps_head() {
        assert_eq!(
            truncate_prefix(b"abcdefgh", 3, TextEncoding::Utf8, "..."),
            "abc..."
        );
        assert_eq!(truncate_prefix(b"abc", 3, TextEncoding::Utf8, "..."), "abc");
    }

    #[test]
    fn test_prefix_mode_respects_char_boundaries() {
        // "é" is two bytes; a 2-byte cut would split it
        let body = "aé!".as_bytes();
        assert_eq!(truncate_prefix(body, 2, TextEncoding::Utf8, "~"), "a~");
        // Odd cut of a UTF-16 body backs off to a whole code unit
        let body = [0x68, 0x00, 0x69, 0x00];
        assert_eq!(truncate_prefix(&body, 3, TextEncoding::Utf16le, "~"), "h~");
    }

    #[test]
    fn test_policy_request_body() {
        let policy = TruncationPolicy::default();
        assert_eq!(policy.request_body(b""), None);
        assert_eq!(policy.request_body(b"a=1").as_deref(), Some("a=1"));

        let big = vec![b'x'; 5000];
        assert_eq!(
            policy.request_body(&big).as_deref(),
            Some(DEFAULT_PLACEHOLDER)
        );

        let omitting = TruncationPolicy {
            omit_oversize_request_body: true,
            ..TruncationPolicy::default()
        };
        assert_eq!(omitting.request_body(&big), None);
        assert_eq!(omitting.request_placeholder(), None);
        assert_eq!(
            policy.request_placeholder().as_deref(),
            Some(DEFAULT_PLACEHOLDER)
        );
        assert_eq!(omitting.request_body(b"small").as_deref(), Some("small"));
    }

    #[test]
    fn test_policy_limits_are_independent() {
        let policy = TruncationPolicy {
            request_body_limit: 2,
            response_body_limit: 10,
            placeholder: "<elided>".to_owned(),
            ..TruncationPolicy::default()
        };
        assert_eq!(policy.request_body(b"hello").as_deref(), Some("<elided>"));
        assert_eq!(policy.response_body(b"hello"), "hello");
        assert_eq!(policy.response_text("short error"), "<elided>");
        assert_eq!(policy.response_text("err"), "err");
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: TruncationPolicy =
            serde_json::from_str(r#"{"response_body_limit": 10, "encoding": "utf-8", "mode": "prefix"}"#)
                .unwrap();
        assert_eq!(policy.response_body_limit, 10);
        assert_eq!(policy.request_body_limit, DEFAULT_REQUEST_BODY_LIMIT);
        assert_eq!(policy.encoding, TextEncoding::Utf8);
        assert_eq!(policy.mode, TruncationMode::Prefix);
        assert_eq!(policy.placeholder, DEFAULT_PLACEHOLDER);
    }
}
