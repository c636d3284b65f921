//! MIME content type and content disposition handling.

use crate::error::{Error, Result};
use crate::params;
use std::collections::HashMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_ascii_lowercase(),
            sub_type: sub_type.into().to_ascii_lowercase(),
            parameters: HashMap::new(),
        }
    }

    /// Creates the RFC 2045 default, `text/plain; charset=us-ascii`.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "us-ascii")
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Checks whether this is the given `type/subtype` (case-insensitive).
    #[must_use]
    pub fn is(&self, mime_type: &str) -> bool {
        mime_type.split_once('/').is_some_and(|(main, sub)| {
            self.main_type.eq_ignore_ascii_case(main.trim())
                && self.sub_type.eq_ignore_ascii_case(sub.trim())
        })
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present and non-empty.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters
            .get("boundary")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }

    /// Returns the `name` parameter, a filename hint.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters
            .get("name")
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` pair is missing or incomplete.
    pub fn parse(s: &str) -> Result<Self> {
        let (primary, parameters) = params::parse(s);

        let (main_type, sub_type) = primary
            .split_once('/')
            .map(|(main, sub)| (main.trim(), sub.trim()))
            .filter(|(main, sub)| !main.is_empty() && !sub.is_empty())
            .ok_or_else(|| Error::InvalidContentType(format!("Missing type/subtype in {s:?}")))?;

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = parameters;
        Ok(content_type)
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::text_plain()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;
        write_parameters(f, &self.parameters)
    }
}

/// Disposition type from a `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DispositionKind {
    /// Offered as a downloadable attachment.
    Attachment,
    /// Meant to be displayed inline.
    Inline,
    /// Any other (non-standard) disposition, lower-cased.
    Other(String),
}

impl DispositionKind {
    /// Parses a disposition type.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "attachment" => Self::Attachment,
            "inline" => Self::Inline,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the disposition type as written in headers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for DispositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ContentDisposition {
    /// Disposition type.
    pub kind: DispositionKind,
    /// Parameters (e.g., filename, size).
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parses a content disposition string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (primary, parameters) = params::parse(s);
        Self {
            kind: DispositionKind::parse(&primary),
            parameters,
        }
    }

    /// Returns the `filename` parameter if present and non-empty.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters
            .get("filename")
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        write_parameters(f, &self.parameters)
    }
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &HashMap<String, String>) -> fmt::Result {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort();

    for (key, value) in sorted {
        // Quote value if it contains special characters
        if value.is_empty()
            || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
        {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "; {key}=\"{escaped}\"")?;
        } else {
            write!(f, "; {key}={value}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("Text", "PLAIN");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_default_is_text_plain() {
        let ct = ContentType::default();
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("us-ascii"));
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/HTML; Charset=utf-8").unwrap();
        assert_eq!(ct.mime_type(), "text/html");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert!(ct.is("TEXT/html"));
        assert!(ct.is_text());
    }

    #[test]
    fn test_content_type_parse_quoted_boundary() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_1;2\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part_1;2"));
    }

    #[test]
    fn test_content_type_parse_name() {
        let ct = ContentType::parse("application/pdf; name=\"r.pdf\"").unwrap();
        assert_eq!(ct.name(), Some("r.pdf"));
    }

    #[test]
    fn test_content_type_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
        assert!(ContentType::parse("").is_err());
    }

    #[test]
    fn test_empty_boundary_is_missing() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"\"").unwrap();
        assert_eq!(ct.boundary(), None);
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"a b\"").unwrap();
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"a b\"");
    }

    #[test]
    fn test_disposition_parse() {
        let cd = ContentDisposition::parse("Attachment; filename=\"r.pdf\"");
        assert_eq!(cd.kind, DispositionKind::Attachment);
        assert_eq!(cd.filename(), Some("r.pdf"));

        let cd = ContentDisposition::parse("inline");
        assert_eq!(cd.kind, DispositionKind::Inline);
        assert_eq!(cd.filename(), None);

        let cd = ContentDisposition::parse("form-data; name=field");
        assert_eq!(cd.kind, DispositionKind::Other("form-data".to_string()));
        assert_eq!(cd.to_string(), "form-data; name=field");
    }
}
