//! Attachment records.
//!
//! An [`Attachment`] borrows the [`Message`] it came from. Its content is
//! decoded lazily: either streamed straight from the message source, or,
//! with [`Staging::TempFile`], decoded once into a temporary file that
//! lives exactly as long as the record.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::Staging;
use crate::content_type::{ContentType, DispositionKind};
use crate::encoding::decode_encoded_words;
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::{Message, PartReader};
use crate::tree::Part;

/// An attachment or inline-referenced part of a message.
#[derive(Debug)]
pub struct Attachment<'m> {
    message: &'m Message,
    part: &'m Part,
    filename: Option<String>,
    staged: RefCell<Option<NamedTempFile>>,
}

impl<'m> Attachment<'m> {
    pub(crate) fn new(message: &'m Message, part: &'m Part) -> Self {
        let filename = part
            .disposition_filename()
            .or_else(|| part.content_name())
            .map(decode_encoded_words);

        Self {
            message,
            part,
            filename,
            staged: RefCell::new(None),
        }
    }

    /// Filename from `Content-Disposition`, else from the `Content-Type`
    /// `name` parameter, with encoded words decoded.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Content type of the part.
    #[must_use]
    pub const fn content_type(&self) -> &'m ContentType {
        self.part.content_type()
    }

    /// `type/subtype` of the part.
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.part.mime_type()
    }

    /// Disposition type, if the part declares one.
    #[must_use]
    pub fn disposition(&self) -> Option<&'m DispositionKind> {
        self.part.disposition_kind()
    }

    /// Part headers.
    #[must_use]
    pub const fn headers(&self) -> &'m Headers {
        self.part.headers()
    }

    /// `Content-ID` of the part.
    #[must_use]
    pub fn content_id(&self) -> Option<&'m str> {
        self.part.content_id()
    }

    /// Dotted id of the underlying part.
    #[must_use]
    pub fn part_id(&self) -> &'m str {
        self.part.id()
    }

    /// The underlying part.
    #[must_use]
    pub const fn part(&self) -> &'m Part {
        self.part
    }

    /// Path of the staged temporary file, once content has been staged.
    #[must_use]
    pub fn staged_path(&self) -> Option<PathBuf> {
        self.staged
            .borrow()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    /// Opens a reader over the decoded content.
    ///
    /// With [`Staging::TempFile`] the first call decodes the whole body into
    /// a temporary file, and every reader afterwards reads that file from
    /// the start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the temporary file cannot be created
    /// or written, and [`Error::Io`] if the message source cannot be read.
    pub fn content(&self) -> Result<AttachmentContent<'_>> {
        match &self.message.config().staging {
            Staging::Stream => Ok(AttachmentContent {
                inner: Content::Streaming(self.message.reader_for(self.part)?),
            }),
            Staging::TempFile { dir } => {
                if self.staged.borrow().is_none() {
                    let staged = self.stage(dir.as_deref())?;
                    *self.staged.borrow_mut() = Some(staged);
                }

                let file = match self.staged.borrow().as_ref() {
                    Some(staged) => staged.reopen().map_err(Error::Resource)?,
                    None => return Err(Error::Resource(io::Error::other("staged file missing"))),
                };
                Ok(AttachmentContent {
                    inner: Content::Staged(file),
                })
            }
        }
    }

    fn stage(&self, dir: Option<&Path>) -> Result<NamedTempFile> {
        let mut staged = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(Error::Resource)?;

        let mut reader = self.message.reader_for(self.part)?;
        let mut buf = vec![0; self.message.config().chunk_size];
        let mut written = 0u64;

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            staged.write_all(&buf[..n]).map_err(Error::Resource)?;
            written += n as u64;
        }
        staged.flush().map_err(Error::Resource)?;

        tracing::debug!(
            part = self.part.id(),
            bytes = written,
            path = %staged.path().display(),
            "Staged attachment"
        );
        Ok(staged)
    }

    /// Reads the whole decoded content into memory.
    ///
    /// # Errors
    ///
    /// As for [`Attachment::content`].
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.content()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Copies the decoded content into `writer`, returning the byte count.
    ///
    /// # Errors
    ///
    /// As for [`Attachment::content`], plus [`Error::Io`] for write failures.
    pub fn copy_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<u64> {
        let mut content = self.content()?;
        Ok(io::copy(&mut content, writer)?)
    }
}

/// Readable decoded attachment content.
pub struct AttachmentContent<'a> {
    inner: Content<'a>,
}

enum Content<'a> {
    Streaming(PartReader<'a>),
    Staged(File),
}

impl AttachmentContent<'_> {
    /// Returns true if reads come from a staged temporary file.
    #[must_use]
    pub const fn is_staged(&self) -> bool {
        matches!(self.inner, Content::Staged(_))
    }
}

impl Read for AttachmentContent<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Content::Streaming(reader) => reader.read(buf),
            Content::Staged(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;

    const MIXED: &str = concat!(
        "Content-Type: multipart/mixed; boundary=\"X\"\r\n",
        "\r\n",
        "--X\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "Hello\r\n",
        "--X\r\n",
        "Content-Type: application/octet-stream; name=\"=?utf-8?B?w6kudHh0?=\"\r\n",
        "Content-Disposition: attachment\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "a=3Db=\r\nc\r\n",
        "--X\r\n",
        "Content-Type: image/gif\r\n",
        "Content-ID: <logo>\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "R0lGODlh\r\n",
        "--X--\r\n",
    );

    #[test]
    fn test_attachment_metadata() {
        let message = Message::parse(MIXED).unwrap();
        let attachments = message.attachments().unwrap();

        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename(), Some("é.txt"));
        assert_eq!(attachments[0].disposition(), Some(&DispositionKind::Attachment));
        assert_eq!(attachments[0].mime_type(), "application/octet-stream");
        assert_eq!(attachments[0].part_id(), "1.2");

        assert_eq!(attachments[1].filename(), None);
        assert_eq!(attachments[1].disposition(), None);
        assert_eq!(attachments[1].content_id(), Some("<logo>"));
        assert_eq!(attachments[1].headers().get("content-type"), Some("image/gif"));
    }

    #[test]
    fn test_streamed_content() {
        let message = Message::parse(MIXED).unwrap();
        let attachments = message.attachments().unwrap();

        let content = attachments[0].content().unwrap();
        assert!(!content.is_staged());
        assert_eq!(attachments[0].read_to_vec().unwrap(), b"a=bc");
        assert_eq!(attachments[1].read_to_vec().unwrap(), b"GIF89a");
        assert_eq!(attachments[0].staged_path(), None);
    }

    #[test]
    fn test_copy_to_writer() {
        let message = Message::parse(MIXED).unwrap();
        let attachments = message.attachments().unwrap();

        let mut sink = Vec::new();
        let copied = attachments[1].copy_to(&mut sink).unwrap();
        assert_eq!(copied, 6);
        assert_eq!(sink, b"GIF89a");
    }

    #[test]
    fn test_staged_content_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let config = ParserConfig::builder().stage_in(dir.path()).build();
        let mut message = Message::with_config(config);
        message.attach_bytes(MIXED).unwrap();

        let path = {
            let attachments = message.attachments().unwrap();
            let attachment = &attachments[1];
            assert_eq!(attachment.staged_path(), None);

            let content = attachment.content().unwrap();
            assert!(content.is_staged());
            let path = attachment.staged_path().unwrap();
            assert!(path.exists());
            assert!(path.starts_with(dir.path()));

            // A second reader starts from the beginning of the same file.
            assert_eq!(attachment.read_to_vec().unwrap(), b"GIF89a");
            assert_eq!(attachment.read_to_vec().unwrap(), b"GIF89a");
            assert_eq!(attachment.staged_path().unwrap(), path);
            drop(content);
            path
        };

        assert!(!path.exists());
    }

    #[test]
    fn test_staging_dir_missing_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let config = ParserConfig::builder().stage_in(&missing).build();
        let mut message = Message::with_config(config);
        message.attach_bytes(MIXED).unwrap();

        // Enumeration succeeds; only materialisation fails.
        let attachments = message.attachments().unwrap();
        assert_eq!(attachments.len(), 2);
        assert!(matches!(attachments[0].content(), Err(Error::Resource(_))));
    }
}
