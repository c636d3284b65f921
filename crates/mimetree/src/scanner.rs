//! Single-pass MIME structure scanner.
//!
//! Walks a byte source line by line and records, for every MIME entity,
//! the byte span of its header block and of its body. Bodies are never
//! decoded here. Multipart containers are entered recursively; the stack
//! of open boundaries lets a child notice a delimiter that belongs to any
//! enclosing container.
//!
//! Byte accounting follows RFC 2046: the line break preceding a delimiter
//! line belongs to the delimiter, not to the body before it.
//!
//! Physical lines are read in pieces of at most [`MAX_LINE_LEN`] bytes, so a
//! long run of binary data without line breaks is never buffered whole.

use std::io::{self, BufRead};
use std::ops::Range;

use crate::content_type::ContentType;
use crate::error::{Error, Result};
use crate::header::Headers;

/// Longest piece of a physical line held in memory at once. Delimiter lines
/// are far shorter (RFC 2046 limits boundaries to 70 characters).
const MAX_LINE_LEN: usize = 64 * 1024;

/// One entity found by the scanner, in document order.
#[derive(Debug, Clone)]
pub(crate) struct ScannedPart {
    /// Index of the enclosing container in the scan output.
    pub parent: Option<usize>,
    pub header_span: Range<u64>,
    pub body_span: Range<u64>,
    pub headers: Headers,
}

/// Scans a whole message.
///
/// # Errors
///
/// Returns [`Error::Structural`] if the top-level header block has no
/// terminating blank line or cannot be parsed, or if a multipart entity
/// declares no boundary. I/O failures are returned as [`Error::Io`].
pub(crate) fn scan<R: BufRead>(reader: R) -> Result<Vec<ScannedPart>> {
    let mut scanner = Scanner {
        lines: LineReader::new(reader),
        parts: Vec::new(),
        boundaries: Vec::new(),
        last_end: 0,
    };
    scanner.scan_entity(None)?;
    Ok(scanner.parts)
}

/// Where scanning of a body stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// End of the source.
    Eof,
    /// A delimiter line, left unconsumed in the line reader.
    Delimiter {
        /// Index into the boundary stack.
        level: usize,
        closing: bool,
    },
}

struct Scanner<R> {
    lines: LineReader<R>,
    parts: Vec<ScannedPart>,
    boundaries: Vec<Vec<u8>>,
    /// End of the most recently recorded body span.
    last_end: u64,
}

impl<R: BufRead> Scanner<R> {
    fn scan_entity(&mut self, parent: Option<usize>) -> Result<Stop> {
        let header_start = self.lines.offset();
        let block = self.read_header_block(parent.is_none())?;

        let headers = if parent.is_none() {
            Headers::parse(&block.raw).map_err(|e| Error::Structural(e.to_string()))?
        } else {
            Headers::parse_lenient(&block.raw)
        };

        let content_type = match headers.get("content-type").map(ContentType::parse) {
            Some(Ok(ct)) => ct,
            Some(Err(e)) => {
                tracing::warn!(error = %e, offset = header_start, "Unparseable Content-Type, using text/plain");
                ContentType::text_plain()
            }
            None => ContentType::text_plain(),
        };

        let index = self.parts.len();
        self.parts.push(ScannedPart {
            parent,
            header_span: header_start..block.body_start,
            body_span: block.body_start..block.body_start,
            headers,
        });
        self.last_end = block.body_start;

        if let Some(stop) = block.cut_short {
            return Ok(stop);
        }

        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or_else(|| {
                Error::Structural(format!(
                    "{} at offset {header_start} declares no boundary",
                    content_type.mime_type()
                ))
            })?;
            return self.scan_multipart(index, boundary.to_string(), block.body_start);
        }

        let (end, stop) = self.scan_to_delimiter(block.body_start)?;
        self.set_body(index, block.body_start..end);
        Ok(stop)
    }

    fn set_body(&mut self, index: usize, span: Range<u64>) {
        self.last_end = span.end;
        self.parts[index].body_span = span;
    }

    /// Reads header lines up to and including the terminating blank line.
    fn read_header_block(&mut self, top_level: bool) -> Result<HeaderBlock> {
        let mut raw = Vec::new();

        loop {
            let Some(line) = self.lines.next_line()? else {
                if top_level {
                    return Err(Error::Structural(
                        "no blank line terminates the header block".to_string(),
                    ));
                }
                tracing::warn!(offset = self.lines.offset(), "Header block cut short by end of input");
                return Ok(HeaderBlock {
                    raw,
                    body_start: self.lines.offset(),
                    cut_short: Some(Stop::Eof),
                });
            };

            if line.starts_line && is_blank(&line.bytes) {
                return Ok(HeaderBlock {
                    raw,
                    body_start: self.lines.offset(),
                    cut_short: None,
                });
            }

            if let Some(stop) = self.delimiter(&line) {
                tracing::warn!(offset = line.offset, "Header block cut short by a boundary");
                let body_start = line.offset;
                self.lines.push_back(line);
                return Ok(HeaderBlock {
                    raw,
                    body_start,
                    cut_short: Some(stop),
                });
            }

            raw.extend_from_slice(&line.bytes);
        }
    }

    fn scan_multipart(&mut self, index: usize, boundary: String, body_start: u64) -> Result<Stop> {
        self.boundaries.push(boundary.into_bytes());
        let level = self.boundaries.len() - 1;

        // Preamble.
        let (mut end, mut stop) = self.scan_to_delimiter(body_start)?;

        let outcome = loop {
            match stop {
                Stop::Delimiter {
                    level: found,
                    closing,
                } if found == level => {
                    let Some(line) = self.lines.next_line()? else {
                        break (end, Stop::Eof);
                    };
                    tracing::trace!(offset = line.offset, closing, "Boundary delimiter");

                    if closing {
                        let close_end = line.offset + content_len(&line.bytes) as u64;
                        self.boundaries.pop();
                        // Epilogue.
                        let (_, after) = self.scan_to_delimiter(self.lines.offset())?;
                        self.set_body(index, body_start..close_end);
                        return Ok(after);
                    }

                    // Parts are recorded in document order, so the latest
                    // body end is the end of the last descendant.
                    stop = self.scan_entity(Some(index))?;
                    end = self.last_end;
                }
                other => {
                    tracing::warn!(
                        offset = self.lines.offset(),
                        "Multipart has no closing boundary, ending it implicitly"
                    );
                    break (end, other);
                }
            }
        };

        self.boundaries.pop();
        let (end, stop) = outcome;
        self.set_body(index, body_start..end.max(body_start));
        Ok(stop)
    }

    /// Consumes lines until a delimiter of any open boundary or end of input.
    ///
    /// Returns the end of the content before the stop point (excluding the
    /// line break owned by the delimiter) and the stop itself. The delimiter
    /// line is left unconsumed.
    fn scan_to_delimiter(&mut self, start: u64) -> Result<(u64, Stop)> {
        let mut last_break = 0usize;

        loop {
            let Some(line) = self.lines.next_line()? else {
                return Ok((self.lines.offset(), Stop::Eof));
            };

            if let Some(stop) = self.delimiter(&line) {
                let at = line.offset;
                self.lines.push_back(line);
                let end = if at > start { at - last_break as u64 } else { at };
                return Ok((end.max(start), stop));
            }

            last_break = line.bytes.len() - content_len(&line.bytes);
        }
    }

    /// Checks whether `line` is a delimiter of an open boundary, innermost first.
    fn delimiter(&self, line: &Line) -> Option<Stop> {
        if !line.starts_line {
            return None;
        }
        let rest = line.bytes.strip_prefix(b"--")?;
        let rest = trim_end(rest);

        self.boundaries
            .iter()
            .enumerate()
            .rev()
            .find_map(|(level, boundary)| {
                let tail = rest.strip_prefix(boundary.as_slice())?;
                if tail.is_empty() {
                    Some(Stop::Delimiter {
                        level,
                        closing: false,
                    })
                } else if tail.starts_with(b"--") {
                    Some(Stop::Delimiter {
                        level,
                        closing: true,
                    })
                } else {
                    None
                }
            })
    }
}

struct HeaderBlock {
    raw: Vec<u8>,
    body_start: u64,
    /// Set when the block ended without a blank line.
    cut_short: Option<Stop>,
}

/// A physical line, or a piece of one, with its absolute offset. `bytes`
/// includes the line break when the piece ends the line.
struct Line {
    offset: u64,
    /// False for the second and later pieces of an over-long line.
    starts_line: bool,
    bytes: Vec<u8>,
}

/// Line reader with offset tracking and a single line of push-back.
struct LineReader<R> {
    inner: R,
    offset: u64,
    at_line_start: bool,
    pending: Option<Line>,
}

impl<R: BufRead> LineReader<R> {
    const fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            at_line_start: true,
            pending: None,
        }
    }

    fn next_line(&mut self) -> io::Result<Option<Line>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }

        let mut bytes = Vec::new();
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                break;
            }

            let window = &available[..available.len().min(MAX_LINE_LEN - bytes.len())];
            let (take, done) = match window.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (window.len(), bytes.len() + window.len() == MAX_LINE_LEN),
            };
            bytes.extend_from_slice(&window[..take]);
            self.inner.consume(take);
            if done {
                break;
            }
        }

        if bytes.is_empty() {
            return Ok(None);
        }

        let line = Line {
            offset: self.offset,
            starts_line: self.at_line_start,
            bytes,
        };
        self.offset += line.bytes.len() as u64;
        self.at_line_start = line.bytes.ends_with(b"\n");
        Ok(Some(line))
    }

    fn push_back(&mut self, line: Line) {
        self.pending = Some(line);
    }

    /// Offset of the next unread byte.
    fn offset(&self) -> u64 {
        self.pending.as_ref().map_or(self.offset, |line| line.offset)
    }
}

fn is_blank(line: &[u8]) -> bool {
    matches!(line, b"\n" | b"\r\n")
}

/// Length of a line without its trailing `\n` or `\r\n`.
fn content_len(line: &[u8]) -> usize {
    match line {
        [.., b'\r', b'\n'] => line.len() - 2,
        [.., b'\n'] => line.len() - 1,
        _ => line.len(),
    }
}

/// Strips the line break and trailing transport padding.
fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}
