//! Content decoding.
//!
//! Streaming Content-Transfer-Encoding decoders (Base64, Quoted-Printable,
//! identity), charset conversion, and RFC 2047 encoded-word decoding for
//! header values. Every decoder here is lenient: malformed input degrades
//! to a best-effort result and never fails.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::Encoding;
use std::fmt;

/// Base64 engine that tolerates missing padding and non-zero trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Transfer encoding types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Binary (no encoding).
    Binary,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Unrecognised encoding, lower-cased. Decoded as identity.
    Other(String),
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "7bit" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the normalized lower-case name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Binary => "binary",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Other(other) => other,
        }
    }

    /// Returns true if bodies in this encoding are returned unchanged.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        !matches!(self, Self::Base64 | Self::QuotedPrintable)
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Identity,
    Base64,
    QuotedPrintable,
}

/// Incremental body decoder.
///
/// Input may be fed in arbitrary chunks. Bytes that cannot be decoded yet
/// (an incomplete Base64 quantum, at most 3 bytes, or a split `=XX` escape)
/// are carried over to the next call. Call [`Decoder::finish`] once the
/// input is exhausted to flush them.
#[derive(Debug, Clone)]
pub struct Decoder {
    mode: Mode,
    carry: Vec<u8>,
}

impl Decoder {
    /// Creates a decoder for the given transfer encoding.
    #[must_use]
    pub const fn new(encoding: &TransferEncoding) -> Self {
        let mode = match encoding {
            TransferEncoding::Base64 => Mode::Base64,
            TransferEncoding::QuotedPrintable => Mode::QuotedPrintable,
            _ => Mode::Identity,
        };
        Self {
            mode,
            carry: Vec::new(),
        }
    }

    /// Decodes a chunk of input, appending the output to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match self.mode {
            Mode::Identity => out.extend_from_slice(input),
            Mode::Base64 => self.feed_base64(input, out),
            Mode::QuotedPrintable => self.feed_quoted_printable(input, out, false),
        }
    }

    /// Flushes any carried-over bytes. The decoder can be reused afterwards.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        match self.mode {
            Mode::Identity => {}
            Mode::Base64 => {
                let pending = std::mem::take(&mut self.carry);
                flush_base64(&pending, out);
            }
            Mode::QuotedPrintable => self.feed_quoted_printable(&[], out, true),
        }
    }

    fn feed_base64(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let mut pending = std::mem::take(&mut self.carry);
        pending.reserve(input.len());

        for &byte in input {
            if is_base64_symbol(byte) {
                pending.push(byte);
            } else if byte == b'=' {
                // Padding closes the current quantum.
                let whole = pending.len() - pending.len() % 4;
                decode_base64_into(&pending[..whole], out);
                flush_base64(&pending[whole..], out);
                pending.clear();
            }
        }

        let whole = pending.len() - pending.len() % 4;
        decode_base64_into(&pending[..whole], out);
        self.carry = pending.split_off(whole);
    }

    fn feed_quoted_printable(&mut self, input: &[u8], out: &mut Vec<u8>, last: bool) {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(input);

        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            if byte != b'=' {
                out.push(byte);
                i += 1;
                continue;
            }

            let rest = &data[i + 1..];
            match classify_escape(rest) {
                Escape::Byte(decoded) => {
                    out.push(decoded);
                    i += 3;
                }
                Escape::SoftBreak(len) => i += 1 + len,
                Escape::Literal => {
                    out.push(b'=');
                    i += 1;
                }
                Escape::Incomplete if last => {
                    // A trailing `=` (plus padding) at the end of the body is a soft break.
                    if rest.iter().all(|b| matches!(b, b' ' | b'\t' | b'\r')) {
                        break;
                    }
                    out.push(b'=');
                    i += 1;
                }
                Escape::Incomplete => {
                    self.carry = data[i..].to_vec();
                    break;
                }
            }
        }
    }
}

/// Decodes a whole body in one call.
#[must_use]
pub fn decode(input: &[u8], encoding: &TransferEncoding) -> Vec<u8> {
    let mut decoder = Decoder::new(encoding);
    let mut out = Vec::with_capacity(input.len());
    decoder.feed(input, &mut out);
    decoder.finish(&mut out);
    out
}

const fn is_base64_symbol(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/')
}

fn decode_base64_into(symbols: &[u8], out: &mut Vec<u8>) {
    if symbols.is_empty() {
        return;
    }
    if let Err(e) = LENIENT_BASE64.decode_vec(symbols, out) {
        tracing::warn!(error = %e, "Skipping undecodable base64 run");
    }
}

/// Decodes a final partial quantum. A lone symbol carries no full byte and
/// is dropped.
fn flush_base64(symbols: &[u8], out: &mut Vec<u8>) {
    if symbols.len() % 4 == 1 {
        decode_base64_into(&symbols[..symbols.len() - 1], out);
    } else {
        decode_base64_into(symbols, out);
    }
}

enum Escape {
    Byte(u8),
    SoftBreak(usize),
    Literal,
    Incomplete,
}

/// Classifies the bytes following a `=` in quoted-printable input.
fn classify_escape(rest: &[u8]) -> Escape {
    if let [hi, lo, ..] = rest {
        if let (Some(hi), Some(lo)) = (hex_value(*hi), hex_value(*lo)) {
            return Escape::Byte((hi << 4) | lo);
        }
    }

    let padding = rest
        .iter()
        .take_while(|b| matches!(b, b' ' | b'\t'))
        .count();
    match &rest[padding..] {
        [b'\n', ..] => Escape::SoftBreak(padding + 1),
        [b'\r', b'\n', ..] => Escape::SoftBreak(padding + 2),
        [] | [b'\r'] => Escape::Incomplete,
        [digit] if padding == 0 && hex_value(*digit).is_some() => Escape::Incomplete,
        _ => Escape::Literal,
    }
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Converts bytes in the named charset to a string.
///
/// Returns `None` if the charset label is unknown.
#[must_use]
pub fn decode_charset(label: &str, bytes: &[u8]) -> Option<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())?;
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    Some(text.into_owned())
}

/// Converts body bytes to text, falling back to lossy UTF-8 when the
/// charset is absent or unknown.
///
/// ASCII labels (including the RFC 2045 `us-ascii` default) are read as
/// UTF-8, of which ASCII is a subset. `encoding_rs` maps them to
/// windows-1252, which would garble undeclared 8-bit UTF-8 text.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    charset
        .filter(|label| !is_ascii_label(label))
        .and_then(|label| decode_charset(label, bytes))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

fn is_ascii_label(label: &str) -> bool {
    matches!(
        label.trim().to_ascii_lowercase().as_str(),
        "us-ascii" | "ascii" | "us" | "ansi_x3.4-1968" | "iso646-us" | "iso-ir-6" | "cp367"
    )
}

/// Decodes RFC 2047 encoded words (`=?charset?B|Q?text?=`) in a header value.
///
/// Whitespace between adjacent encoded words is dropped. Words that are
/// malformed or name an unknown charset are left as they are.
#[must_use]
pub fn decode_encoded_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = parse_encoded_word(candidate) {
            if !(after_word && before.trim().is_empty()) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }
    out.push_str(rest);

    out
}

/// Parses one encoded word at the start of `s`, returning the decoded text
/// and the number of bytes consumed.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, inner) = inner.split_once('?')?;
    let (scheme, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let payload = &inner[..end];

    if charset.is_empty() || payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match scheme {
        "B" | "b" => LENIENT_BASE64.decode(payload).ok()?,
        "Q" | "q" => decode_q(payload.as_bytes()),
        _ => return None,
    };

    // RFC 2231 allows a language suffix: `charset*lang`.
    let label = charset.split('*').next().unwrap_or(charset);
    let decoded = decode_charset(label, &bytes)?;
    let consumed = 2 + charset.len() + 1 + scheme.len() + 1 + end + 2;
    Some((decoded, consumed))
}

fn decode_q(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;

    while i < payload.len() {
        match payload[i] {
            b'_' => out.push(b' '),
            b'=' => {
                if let Some(&[hi, lo]) = payload.get(i + 1..i + 3) {
                    if let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo)) {
                        out.push((hi << 4) | lo);
                        i += 3;
                        continue;
                    }
                }
                out.push(b'=');
            }
            other => out.push(other),
        }
        i += 1;
    }

    out
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

    fn decode_in_chunks(input: &[u8], encoding: &TransferEncoding, size: usize) -> Vec<u8> {
        let mut decoder = Decoder::new(encoding);
        let mut out = Vec::new();
        for chunk in input.chunks(size) {
            decoder.feed(chunk, &mut out);
        }
        decoder.finish(&mut out);
        out
    }

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(""), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(
            TransferEncoding::parse("X-UUEncode"),
            TransferEncoding::Other("x-uuencode".to_string())
        );
        assert_eq!(TransferEncoding::parse("X-UUEncode").as_str(), "x-uuencode");
    }

    #[test]
    fn test_base64_decode() {
        let decoded = decode(b"SGVsbG8sIFdvcmxkIQ==", &TransferEncoding::Base64);
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_lenient_noise() {
        let decoded = decode(b"SGVs\r\nbG8s*IFdv\tcmxk IQ", &TransferEncoding::Base64);
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_chunk_boundaries() {
        let input = b"SGVs\r\nbG8sIFdv\r\ncmxkIQ==\r\n";
        for size in 1..input.len() {
            assert_eq!(
                decode_in_chunks(input, &TransferEncoding::Base64, size),
                b"Hello, World!",
                "chunk size {size}"
            );
        }
    }

    #[test]
    fn test_base64_carry_is_bounded() {
        let mut decoder = Decoder::new(&TransferEncoding::Base64);
        let mut out = Vec::new();
        decoder.feed(b"SGVsbG8", &mut out);
        assert_eq!(out, b"Hel");
        assert!(decoder.carry.len() <= 3);
        decoder.finish(&mut out);
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn test_base64_concatenated_segments() {
        let decoded = decode(b"QQ==Qg==", &TransferEncoding::Base64);
        assert_eq!(decoded, b"AB");
    }

    #[test]
    fn test_quoted_printable_decode() {
        let decoded = decode(b"H=C3=A9llo", &TransferEncoding::QuotedPrintable);
        assert_eq!(decoded, "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode(b"Hello=\r\nWorld=\nAgain=  \r\n!", &TransferEncoding::QuotedPrintable);
        assert_eq!(decoded, b"HelloWorldAgain!");
    }

    #[test]
    fn test_quoted_printable_invalid_escape_passes_through() {
        let decoded = decode(b"a=zz b=4 c=", &TransferEncoding::QuotedPrintable);
        assert_eq!(decoded, b"a=zz b=4 c");
    }

    #[test]
    fn test_quoted_printable_chunk_boundaries() {
        let input = b"caf=C3=A9 =\r\nau lait=3D=\nyes";
        for size in 1..input.len() {
            assert_eq!(
                decode_in_chunks(input, &TransferEncoding::QuotedPrintable, size),
                "café au lait=yes".as_bytes(),
                "chunk size {size}"
            );
        }
    }

    #[test]
    fn test_identity_encodings() {
        let raw = b"=C3 SGVs \xff";
        for encoding in [
            TransferEncoding::SevenBit,
            TransferEncoding::EightBit,
            TransferEncoding::Binary,
            TransferEncoding::Other("x-custom".to_string()),
        ] {
            assert_eq!(decode(raw, &encoding), raw);
        }
    }

    #[test]
    fn test_decode_charset() {
        assert_eq!(decode_charset("ISO-8859-1", b"caf\xe9").unwrap(), "café");
        assert!(decode_charset("x-unknown", b"abc").is_none());
        assert_eq!(decode_text(b"abc", Some("x-unknown")), "abc");
    }

    #[test]
    fn test_decode_text_ascii_label_reads_utf8() {
        let bytes = "caf\u{e9}".as_bytes();
        assert_eq!(decode_text(bytes, Some("us-ascii")), "café");
        assert_eq!(decode_text(bytes, Some(" US-ASCII ")), "café");
        assert_eq!(decode_text(bytes, None), "café");
        assert_eq!(decode_text(b"caf\xe9", Some("iso-8859-1")), "café");
    }

    #[test]
    fn test_encoded_words() {
        assert_eq!(decode_encoded_words("Hello"), "Hello");
        assert_eq!(decode_encoded_words("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(decode_encoded_words("=?utf-8?Q?H=C3=A9llo_there?="), "Héllo there");
        assert_eq!(
            decode_encoded_words("Re: =?iso-8859-1?q?caf=E9?= =?utf-8?b?IQ==?= ok"),
            "Re: café! ok"
        );
    }

    #[test]
    fn test_encoded_words_malformed_kept() {
        assert_eq!(decode_encoded_words("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
        assert_eq!(decode_encoded_words("a =? b"), "a =? b");
        assert_eq!(decode_encoded_words("=?bogus?B?SGk=?="), "=?bogus?B?SGk=?=");
    }
}
