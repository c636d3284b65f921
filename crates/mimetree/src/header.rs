//! MIME header handling.
//!
//! Parsing happens in two stages. The lexer splits a raw header block into
//! logical lines, unfolding continuation lines. The parser then splits each
//! logical line on its first colon.

use crate::encoding::decode_encoded_words;
use crate::error::{Error, Result};
use std::fmt;

/// A single header field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HeaderField {
    name: String,
    key: String,
    value: String,
}

impl HeaderField {
    /// Creates a header field. The name is trimmed, the value is kept as given.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        let key = name.to_ascii_lowercase();
        Self {
            name,
            key,
            value: value.into(),
        }
    }

    /// Header name in its original casing.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header name lower-cased, used for lookups.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Header value with surrounding whitespace trimmed.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this field has the given name (case-insensitive).
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name)
    }
}

/// Ordered collection of email headers.
///
/// Duplicate names (for example several `Received` lines) are kept in
/// the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Headers {
    fields: Vec<HeaderField>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(HeaderField::new(name, value));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.is(name))
            .map(HeaderField::value)
    }

    /// Gets all values for a header, in order of appearance.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| field.is(name))
            .map(HeaderField::value)
            .collect()
    }

    /// Gets the first value for a header with RFC 2047 encoded words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_encoded_words)
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.is(name))
    }

    /// Number of header fields, counting duplicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns an iterator over all header fields in original order.
    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    /// Parses a raw header block.
    ///
    /// Headers are in the format:
    /// ```text
    /// Header-Name: value
    ///   continuation
    /// ```
    ///
    /// A line without a colon continues the previous header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the first logical line has no
    /// header name.
    pub fn parse(block: &[u8]) -> Result<Self> {
        parse_block(block, true)
    }

    /// Parses a raw header block, dropping leading lines that have no name.
    #[must_use]
    pub fn parse_lenient(block: &[u8]) -> Self {
        // Lenient mode never reports an error.
        parse_block(block, false).unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            write!(f, "{}: {}\r\n", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Splits a header block into logical lines.
///
/// Folded lines (starting with space or tab) are joined onto the previous
/// line with the line break and their leading whitespace removed.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();

    for physical in text.split('\n') {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);
        if physical.trim().is_empty() {
            continue;
        }

        let folded = physical.starts_with([' ', '\t']);
        match lines.last_mut() {
            Some(current) if folded => current.push_str(physical.trim_start()),
            _ => lines.push(physical.to_string()),
        }
    }

    lines
}

fn parse_block(block: &[u8], strict: bool) -> Result<Headers> {
    let text = String::from_utf8_lossy(block);
    let mut headers = Headers::new();

    for line in logical_lines(&text) {
        let split = line
            .split_once(':')
            .filter(|(name, _)| !name.trim().is_empty() && !name.starts_with([' ', '\t']));

        if let Some((name, value)) = split {
            headers.add(name, value.trim());
            continue;
        }

        match headers.fields.last_mut() {
            Some(previous) => {
                previous.value.push_str(line.trim_start());
                previous.value = previous.value.trim().to_string();
            }
            None if strict => {
                return Err(Error::InvalidHeader(format!(
                    "first header line has no name: {line:?}"
                )));
            }
            None => {
                tracing::warn!(line = %line, "Dropping header line without a name");
            }
        }
    }

    Ok(headers)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("Subject"), None);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
        );

        let headers = Headers::parse(text.as_bytes()).unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain;charset=utf-8"));
    }

    #[test]
    fn test_duplicates_keep_order() {
        let text = "Received: from a\nX-Other: 1\nReceived: from b\nReceived: from c\n";
        let headers = Headers::parse(text.as_bytes()).unwrap();

        assert_eq!(
            headers.get_all("received"),
            vec!["from a", "from b", "from c"]
        );
        let names: Vec<&str> = headers.iter().map(HeaderField::name).collect();
        assert_eq!(names, vec!["Received", "X-Other", "Received", "Received"]);
    }

    #[test]
    fn test_original_casing_retained() {
        let headers = Headers::parse(b"X-MiXeD-Case: yes\r\n").unwrap();
        let field = headers.iter().next().unwrap();
        assert_eq!(field.name(), "X-MiXeD-Case");
        assert_eq!(field.key(), "x-mixed-case");
    }

    #[test]
    fn test_tab_folded_value() {
        let headers = Headers::parse(b"Subject: first half\r\n\tsecond half\r\n").unwrap();
        assert_eq!(headers.get("subject"), Some("first halfsecond half"));
    }

    #[test]
    fn test_value_split_on_first_colon() {
        let headers = Headers::parse(b"Date:  Mon, 1 Jan 2024 10:20:30 +0000  \n").unwrap();
        assert_eq!(headers.get("date"), Some("Mon, 1 Jan 2024 10:20:30 +0000"));
    }

    #[test]
    fn test_line_without_colon_continues_previous() {
        let headers = Headers::parse(b"Subject: broken\nwrapped text\nTo: a@b.c\n").unwrap();
        assert_eq!(headers.get("subject"), Some("brokenwrapped text"));
        assert_eq!(headers.get("to"), Some("a@b.c"));
    }

    #[test]
    fn test_first_line_without_name_is_error() {
        let result = Headers::parse(b"not a header\nSubject: x\n");
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_lenient_drops_orphan_line() {
        let headers = Headers::parse_lenient(b"  orphan\nSubject: x\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("x"));
    }

    #[test]
    fn test_headers_display() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("to", "recipient@example.com");

        let s = headers.to_string();
        assert_eq!(s, "From: sender@example.com\r\nto: recipient@example.com\r\n");
    }

    #[test]
    fn test_get_decoded() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?SMOpbGxv?=");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo"));
    }
}
