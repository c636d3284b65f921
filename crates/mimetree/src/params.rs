//! Parameterized header values.
//!
//! Handles `primary; name=value; name="quoted value"` as used by
//! `Content-Type` and `Content-Disposition`, including RFC 2231 extended
//! (`name*=charset'lang'%XX`) and continued (`name*0=`, `name*1*=`) values.

use crate::encoding::decode_charset;
use std::collections::HashMap;

/// Splits a header value into its primary value and resolved parameters.
///
/// Parameter names are lower-cased. Quoted values are unquoted. RFC 2231
/// parameters are decoded and stored under their base name. When an
/// extended value cannot be decoded, the plain form of the same parameter
/// wins if present.
pub(crate) fn parse(value: &str) -> (String, HashMap<String, String>) {
    let mut segments = split_unquoted(value).into_iter();
    let primary = segments.next().unwrap_or_default().trim().to_string();

    let mut plain = HashMap::new();
    let mut extended: HashMap<String, Vec<Segment>> = HashMap::new();

    for segment in segments {
        let Some((name, raw)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = unquote(raw);

        match Segment::parse_name(&name) {
            Some((base, index, encoded)) => extended.entry(base).or_default().push(Segment {
                index,
                encoded,
                value,
            }),
            None => {
                plain.entry(name).or_insert(value);
            }
        }
    }

    for (base, segments) in extended {
        let (decoded, complete) = join_segments(segments);
        if complete || !plain.contains_key(&base) {
            plain.insert(base, decoded);
        } else {
            tracing::warn!(parameter = %base, "Undecodable RFC 2231 parameter, using plain form");
        }
    }

    (primary, plain)
}

/// One piece of an RFC 2231 parameter.
#[derive(Debug)]
struct Segment {
    index: u32,
    encoded: bool,
    value: String,
}

impl Segment {
    /// Recognises `base*`, `base*N` and `base*N*`, returning the base name,
    /// segment index and whether the value is percent-encoded.
    fn parse_name(name: &str) -> Option<(String, u32, bool)> {
        let (base, rest) = name.split_once('*')?;
        if base.is_empty() {
            return None;
        }
        if rest.is_empty() {
            return Some((base.to_string(), 0, true));
        }

        let (digits, encoded) = rest
            .strip_suffix('*')
            .map_or((rest, false), |digits| (digits, true));
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((base.to_string(), digits.parse().ok()?, encoded))
    }
}

/// Joins continuation segments in index order and decodes the result.
///
/// The flag is false when the declared charset is unknown; the text is
/// then a lossy UTF-8 rendering of the raw bytes.
fn join_segments(mut segments: Vec<Segment>) -> (String, bool) {
    segments.sort_by_key(|s| s.index);

    let mut charset = None;
    let mut bytes = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        if !segment.encoded {
            bytes.extend_from_slice(segment.value.as_bytes());
            continue;
        }

        let mut text = segment.value.as_str();
        if i == 0 {
            let mut pieces = text.splitn(3, '\'');
            if let (Some(cs), Some(_lang), Some(rest)) = (pieces.next(), pieces.next(), pieces.next()) {
                if !cs.is_empty() {
                    charset = Some(cs.to_string());
                }
                text = rest;
            }
        }
        bytes.extend(percent_decode(text));
    }

    let decoded = charset.map_or_else(
        || Some(String::from_utf8_lossy(&bytes).into_owned()),
        |label| decode_charset(&label, &bytes),
    );
    match decoded {
        Some(text) => (text, true),
        None => (String::from_utf8_lossy(&bytes).into_owned(), false),
    }
}

fn percent_decode(text: &str) -> Vec<u8> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] == b'%' {
            if let Some(&[hi, lo]) = raw.get(i + 1..i + 3) {
                if let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo)) {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(raw[i]);
        i += 1;
    }

    out
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Splits on `;` outside quoted strings.
fn split_unquoted(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);

    segments
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix('"') else {
        return raw.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
