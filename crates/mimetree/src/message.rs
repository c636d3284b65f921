//! MIME message structure and handling.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};

use crate::attachment::Attachment;
use crate::config::ParserConfig;
use crate::encoding::{Decoder, decode_text};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::scanner;
use crate::source::{self, ByteSource, SourceReader};
use crate::tree::{Part, PartTree};

/// Which body to select with [`Message::message_body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// `text/plain`.
    Text,
    /// `text/html`.
    Html,
}

impl BodyKind {
    /// Content type matched by this kind.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Html => "text/html",
        }
    }
}

impl FromStr for BodyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            other => Err(Error::InvalidArgument(format!(
                "body kind must be \"text\" or \"html\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Html => write!(f, "html"),
        }
    }
}

/// The source and part tree of an attached message.
struct Parsed {
    source: Box<dyn ByteSource>,
    tree: PartTree,
}

/// A MIME message backed by a byte source.
///
/// A message starts unattached. Attaching a source scans it once and
/// builds the part tree eagerly; bodies stay in the source and are decoded
/// only when read. Parts, readers and attachment records borrow the
/// message, so they can never outlive the source they read from.
pub struct Message {
    config: ParserConfig,
    parsed: Option<Parsed>,
}

impl Message {
    /// Creates an unattached message with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Creates an unattached message with the given configuration.
    #[must_use]
    pub const fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            parsed: None,
        }
    }

    /// Parses an in-memory message.
    ///
    /// # Errors
    ///
    /// See [`Message::attach_bytes`].
    pub fn parse(data: impl Into<Vec<u8>>) -> Result<Self> {
        let mut message = Self::new();
        message.attach_bytes(data)?;
        Ok(message)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Returns true once a source has been attached successfully.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.parsed.is_some()
    }

    /// Attaches a message file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or read, and
    /// [`Error::Structural`] if it is not a usable MIME message.
    pub fn attach_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let file: File = source::open_path(path.as_ref())?;
        self.attach_source(Box::new(file))
    }

    /// Attaches a readable stream.
    ///
    /// The stream is first copied into a scoped temporary file so parts can
    /// be read back at random offsets. The file is removed when the message
    /// is dropped or re-attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the temporary file cannot be created,
    /// and otherwise as for [`Message::attach_path`].
    pub fn attach_reader<R: Read>(&mut self, reader: R) -> Result<&mut Self> {
        self.parsed = None;
        let spooled = source::spool(reader, self.config.spool_dir())?;
        self.attach_source(Box::new(spooled))
    }

    /// Attaches an in-memory message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the data is not a usable MIME message.
    pub fn attach_bytes(&mut self, data: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.attach_source(Box::new(data.into()))
    }

    /// Attaches any byte source and builds the part tree.
    ///
    /// On failure the message is left unattached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] for malformed structure and
    /// [`Error::Io`] for read failures.
    pub fn attach_source(&mut self, source: Box<dyn ByteSource>) -> Result<&mut Self> {
        self.parsed = None;

        let size = source.size()?;
        let reader = BufReader::with_capacity(
            self.config.chunk_size,
            SourceReader::new(source.as_ref(), 0..size),
        );
        let tree = PartTree::build(scanner::scan(reader)?);

        tracing::debug!(
            source = source.kind(),
            bytes = size,
            parts = tree.len(),
            "Attached message"
        );
        self.parsed = Some(Parsed { source, tree });
        Ok(self)
    }

    fn parsed(&self) -> Result<&Parsed> {
        self.parsed.as_ref().ok_or(Error::NotParsed)
    }

    /// Returns the part tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn tree(&self) -> Result<&PartTree> {
        Ok(&self.parsed()?.tree)
    }

    /// Iterates all parts in document order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn parts(&self) -> Result<std::slice::Iter<'_, Part>> {
        Ok(self.tree()?.iter())
    }

    /// Looks up a part by its dotted id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn part(&self, id: &str) -> Result<Option<&Part>> {
        Ok(self.tree()?.get(id))
    }

    fn require_part(&self, id: &str) -> Result<&Part> {
        self.part(id)?
            .ok_or_else(|| Error::InvalidArgument(format!("no part with id {id:?}")))
    }

    /// Headers of the top-level part, in original order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn headers(&self) -> Result<&Headers> {
        Ok(self.tree()?.root().headers())
    }

    /// First value of a top-level header, looked up case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn header(&self, name: &str) -> Result<Option<&str>> {
        Ok(self.headers()?.get(name))
    }

    /// Gets the Subject header with encoded words decoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn subject(&self) -> Result<Option<String>> {
        Ok(self.headers()?.get_decoded("subject"))
    }

    /// Parses the Date header. An unparseable date yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        Ok(self
            .header("date")?
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok()))
    }

    /// The top-level header block exactly as it appears in the source,
    /// including the terminating blank line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached, or
    /// [`Error::Io`] if the source cannot be read.
    pub fn raw_headers(&self) -> Result<String> {
        let parsed = self.parsed()?;
        let raw = parsed.source.read_range(parsed.tree.root().header_span())?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Undecoded body bytes of a part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unknown id, and
    /// [`Error::NotParsed`] or [`Error::Io`] as for the other accessors.
    pub fn raw_part_body(&self, id: &str) -> Result<Vec<u8>> {
        let part = self.require_part(id)?;
        Ok(self.parsed()?.source.read_range(part.body_span())?)
    }

    /// Streaming reader over the decoded body of a part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unknown id and
    /// [`Error::NotParsed`] if no source is attached.
    pub fn part_reader(&self, id: &str) -> Result<PartReader<'_>> {
        let part = self.require_part(id)?;
        self.reader_for(part)
    }

    pub(crate) fn reader_for<'a>(&'a self, part: &'a Part) -> Result<PartReader<'a>> {
        let parsed = self.parsed()?;
        Ok(PartReader::new(
            SourceReader::new(parsed.source.as_ref(), part.body_span()),
            Decoder::new(part.transfer_encoding()),
            self.config.chunk_size,
        ))
    }

    fn decoded_body(&self, part: &Part) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.reader_for(part)?.read_to_end(&mut body)?;
        Ok(body)
    }

    /// Finds the body part of the requested kind and returns its decoded text.
    ///
    /// Every `text/plain` (or `text/html`) part without a
    /// `Content-Disposition` is a candidate, and the last one in document
    /// order wins. Returns `None` if there is no candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached, or
    /// [`Error::Io`] if the source cannot be read.
    pub fn message_body(&self, kind: BodyKind) -> Result<Option<String>> {
        // Last match in document order wins.
        let selected = self
            .parts()?
            .rev()
            .find(|part| part.content_type().is(kind.mime_type()) && part.disposition().is_none());

        let Some(part) = selected else {
            return Ok(None);
        };

        tracing::debug!(part = part.id(), %kind, "Selected message body");
        let body = self.decoded_body(part)?;
        Ok(Some(decode_text(&body, part.charset())))
    }

    /// Headers of the last part of the requested kind, ignoring disposition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn message_body_headers(&self, kind: BodyKind) -> Result<Option<&Headers>> {
        Ok(self
            .parts()?
            .rev()
            .find(|part| part.content_type().is(kind.mime_type()))
            .map(Part::headers))
    }

    /// Lists attachments in document order.
    ///
    /// A part is an attachment if its disposition is `attachment` or
    /// `inline`, or if it has a `Content-ID`. Content is not read until
    /// requested from the returned records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotParsed`] if no source is attached.
    pub fn attachments(&self) -> Result<Vec<Attachment<'_>>> {
        Ok(self
            .parts()?
            .filter(|part| part.is_attachment())
            .map(|part| Attachment::new(self, part))
            .collect())
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("config", &self.config)
            .field("source", &self.parsed.as_ref().map(|p| p.source.kind()))
            .field("parts", &self.parsed.as_ref().map(|p| p.tree.len()))
            .finish()
    }
}

/// Streaming reader over a decoded part body.
///
/// Raw bytes are read from the source in windows of the configured chunk
/// size and decoded incrementally, so memory use is bounded by the window
/// rather than the body size.
pub struct PartReader<'a> {
    raw: SourceReader<'a>,
    decoder: Decoder,
    window: Vec<u8>,
    decoded: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<'a> PartReader<'a> {
    fn new(raw: SourceReader<'a>, decoder: Decoder, chunk_size: usize) -> Self {
        Self {
            raw,
            decoder,
            window: vec![0; chunk_size.max(4)],
            decoded: Vec::new(),
            pos: 0,
            finished: false,
        }
    }
}

impl Read for PartReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.decoded.len() {
            if self.finished {
                return Ok(0);
            }

            self.decoded.clear();
            self.pos = 0;

            let n = self.raw.read(&mut self.window)?;
            if n == 0 {
                self.decoder.finish(&mut self.decoded);
                self.finished = true;
            } else {
                self.decoder.feed(&self.window[..n], &mut self.decoded);
            }
        }

        let n = buf.len().min(self.decoded.len() - self.pos);
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
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

    const ALTERNATIVE: &str = concat!(
        "From: sender@example.com\r\n",
        "To: recipient@example.com\r\n",
        "Subject: =?utf-8?Q?Caf=C3=A9?=\r\n",
        "Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n",
        "Content-Type: multipart/alternative; boundary=\"alt\"\r\n",
        "\r\n",
        "--alt\r\n",
        "Content-Type: text/plain; charset=iso-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "caf=E9 cr=E8me\r\n",
        "--alt\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>caf\u{e9}</p>\r\n",
        "--alt--\r\n",
    );

    #[test]
    fn test_body_kind_from_str() {
        assert_eq!("text".parse::<BodyKind>().unwrap(), BodyKind::Text);
        assert_eq!("html".parse::<BodyKind>().unwrap(), BodyKind::Html);
        assert!(matches!(
            "pdf".parse::<BodyKind>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unattached_message() {
        let message = Message::new();
        assert!(!message.is_attached());
        assert!(matches!(message.headers(), Err(Error::NotParsed)));
        assert!(matches!(message.raw_headers(), Err(Error::NotParsed)));
        assert!(matches!(message.attachments(), Err(Error::NotParsed)));
        assert!(matches!(
            message.message_body(BodyKind::Text),
            Err(Error::NotParsed)
        ));
    }

    #[test]
    fn test_envelope_accessors() {
        let message = Message::parse(ALTERNATIVE).unwrap();
        assert_eq!(message.header("FROM").unwrap(), Some("sender@example.com"));
        assert_eq!(message.header("x-missing").unwrap(), None);
        assert_eq!(message.subject().unwrap().as_deref(), Some("Café"));

        let date = message.date().unwrap().unwrap();
        assert_eq!(date.to_rfc3339(), "2003-07-01T10:52:37+02:00");
    }

    #[test]
    fn test_raw_headers_exact() {
        let message = Message::parse(ALTERNATIVE).unwrap();
        let raw = message.raw_headers().unwrap();
        assert!(raw.starts_with("From: sender@example.com\r\n"));
        assert!(raw.ends_with("boundary=\"alt\"\r\n\r\n"));
    }

    #[test]
    fn test_charset_aware_bodies() {
        let message = Message::parse(ALTERNATIVE).unwrap();
        assert_eq!(
            message.message_body(BodyKind::Text).unwrap().as_deref(),
            Some("café crème")
        );
        assert_eq!(
            message.message_body(BodyKind::Html).unwrap().as_deref(),
            Some("<p>café</p>")
        );
    }

    #[test]
    fn test_undeclared_charset_body_is_utf8() {
        let message = Message::parse("Subject: x\r\n\r\ncaf\u{e9}").unwrap();
        assert_eq!(message.part("1").unwrap().unwrap().charset(), Some("us-ascii"));
        assert_eq!(
            message.message_body(BodyKind::Text).unwrap().as_deref(),
            Some("café")
        );

        let declared = Message::parse("Content-Type: text/plain\r\n\r\ncaf\u{e9}").unwrap();
        assert_eq!(
            declared.message_body(BodyKind::Text).unwrap(),
            message.message_body(BodyKind::Text).unwrap()
        );
    }

    #[test]
    fn test_message_body_headers() {
        let message = Message::parse(ALTERNATIVE).unwrap();
        let headers = message.message_body_headers(BodyKind::Html).unwrap().unwrap();
        assert_eq!(headers.get("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_no_matching_body() {
        let message = Message::parse("Content-Type: text/plain\n\nonly text\n").unwrap();
        assert_eq!(message.message_body(BodyKind::Html).unwrap(), None);
        assert_eq!(message.message_body_headers(BodyKind::Html).unwrap(), None);
    }

    #[test]
    fn test_disposition_excludes_body_but_not_headers() {
        let text = concat!(
            "Content-Type: multipart/mixed; boundary=m\n\n",
            "--m\nContent-Type: text/plain\n\nbody\n",
            "--m\nContent-Type: text/plain\nContent-Disposition: attachment; filename=n.txt\n\nnote\n",
            "--m--\n",
        );
        let message = Message::parse(text).unwrap();
        assert_eq!(
            message.message_body(BodyKind::Text).unwrap().as_deref(),
            Some("body")
        );
        let headers = message.message_body_headers(BodyKind::Text).unwrap().unwrap();
        assert!(headers.contains("content-disposition"));
    }

    #[test]
    fn test_part_reader_small_chunks() {
        let text = "Content-Transfer-Encoding: base64\n\nSGVsbG8s\nIFdvcmxk\nIQ==\n";
        let config = ParserConfig::builder().chunk_size(5).build();
        let mut message = Message::with_config(config);
        message.attach_bytes(text).unwrap();

        let mut decoded = String::new();
        message
            .part_reader("1")
            .unwrap()
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "Hello, World!");
        assert_eq!(message.raw_part_body("1").unwrap(), b"SGVsbG8s\nIFdvcmxk\nIQ==\n");
    }

    #[test]
    fn test_unknown_part_id() {
        let message = Message::parse("Subject: x\n\nbody").unwrap();
        assert!(matches!(
            message.part_reader("9.9"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failed_attach_leaves_message_unattached() {
        let mut message = Message::new();
        message.attach_bytes("Subject: ok\n\nbody\n").unwrap();
        assert!(message.is_attached());

        let result = message.attach_bytes("Subject: no blank line\n");
        assert!(matches!(result, Err(Error::Structural(_))));
        assert!(!message.is_attached());
        assert!(matches!(message.headers(), Err(Error::NotParsed)));
    }

    #[test]
    fn test_message_moves_across_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<Message>();

        let message = Message::parse("Subject: threaded\n\nbody\n").unwrap();
        let shared = std::sync::Mutex::new(message);
        let subject = std::thread::scope(|scope| {
            scope
                .spawn(|| shared.lock().unwrap().subject().unwrap())
                .join()
                .unwrap()
        });
        assert_eq!(subject.as_deref(), Some("threaded"));
    }
}
