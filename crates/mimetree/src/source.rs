//! Seekable byte sources.
//!
//! A [`ByteSource`] is the only capability the scanner and the accessors
//! need: the total size and positional reads. Reads take `&self`, so parts
//! and attachment streams can borrow the owning message while reading.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Random-access, read-only bytes backing a parsed message.
pub trait ByteSource: Send {
    /// Total number of bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the size cannot be determined.
    fn size(&self) -> io::Result<u64>;

    /// Reads bytes starting at `offset` into `buf`, returning how many were
    /// read. Zero means end of source.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the underlying read fails.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads the half-open byte range `range`, stopping early at end of source.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the underlying read fails.
    fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let len = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut buf = vec![0; len];
        let mut filled = 0;

        while filled < len {
            let n = self.read_at(range.start + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        buf.truncate(filled);
        Ok(buf)
    }

    /// Short label used in logs.
    fn kind(&self) -> &'static str;
}

impl ByteSource for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let available = &self[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

impl ByteSource for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        // `&File` implements Read + Seek; the cursor is shared but every
        // read seeks first.
        let mut file = self;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

impl ByteSource for NamedTempFile {
    fn size(&self) -> io::Result<u64> {
        self.as_file().size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_file().read_at(offset, buf)
    }

    fn kind(&self) -> &'static str {
        "spooled"
    }
}

/// Opens a file as a byte source.
pub(crate) fn open_path(path: &Path) -> Result<File> {
    File::open(path).map_err(Error::Io)
}

/// Copies a non-seekable reader into a scoped temporary file.
///
/// The file is deleted when the returned handle is dropped.
pub(crate) fn spool<R: Read>(mut reader: R, dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut spooled = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(Error::Resource)?;

    let copied = io::copy(&mut reader, spooled.as_file_mut()).map_err(Error::Io)?;
    tracing::debug!(bytes = copied, path = %spooled.path().display(), "Spooled reader to temporary file");
    Ok(spooled)
}

/// Sequential [`Read`] adapter over a byte range of a source.
pub struct SourceReader<'a> {
    source: &'a dyn ByteSource,
    position: u64,
    end: u64,
}

impl<'a> SourceReader<'a> {
    /// Creates a reader over `range` of `source`.
    #[must_use]
    pub fn new(source: &'a dyn ByteSource, range: Range<u64>) -> Self {
        Self {
            source,
            position: range.start,
            end: range.end,
        }
    }

    /// Current absolute offset into the source.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.position);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.source.read_at(self.position, &mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }
}
