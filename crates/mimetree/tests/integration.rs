//! Integration tests for message parsing and access.
//!
//! These tests drive the public API end to end over in-memory, file and
//! reader sources.

#![allow(clippy::unwrap_used)]

use std::io::{Cursor, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;

use mimetree::encoding::decode;
use mimetree::{
    BodyKind, Decoder, DispositionKind, Error, Message, ParserConfig, Staging, TransferEncoding,
};

const PDF_MAGIC: [u8; 4] = [0x25, 0x50, 0x44, 0x46];

fn report() -> String {
    [
        "From: reports@example.com",
        "To: team@example.com",
        "Subject: Monthly report",
        "Content-Type: multipart/mixed; boundary=\"X\"",
        "",
        "--X",
        "Content-Type: text/plain",
        "",
        "Hello",
        "--X",
        "Content-Type: application/pdf",
        "Content-Disposition: attachment; filename=\"r.pdf\"",
        "Content-Transfer-Encoding: base64",
        "",
        &STANDARD.encode(PDF_MAGIC),
        "--X--",
        "",
    ]
    .join("\r\n")
}

#[test]
fn test_end_to_end_report() {
    let message = Message::parse(report()).unwrap();

    assert_eq!(
        message.message_body(BodyKind::Text).unwrap().as_deref(),
        Some("Hello")
    );

    let attachments = message.attachments().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].filename(), Some("r.pdf"));
    assert_eq!(attachments[0].mime_type(), "application/pdf");
    assert_eq!(attachments[0].disposition(), Some(&DispositionKind::Attachment));
    assert_eq!(attachments[0].read_to_vec().unwrap(), PDF_MAGIC);
}

#[test]
fn test_last_plain_text_part_wins() {
    let text = concat!(
        "Content-Type: multipart/mixed; boundary=sel\r\n\r\n",
        "--sel\r\nContent-Type: text/plain\r\n\r\nA\r\n",
        "--sel\r\nContent-Type: text/plain\r\n\r\nB\r\n",
        "--sel--\r\n",
    );
    let message = Message::parse(text).unwrap();
    assert_eq!(
        message.message_body(BodyKind::Text).unwrap().as_deref(),
        Some("B")
    );
}

#[test]
fn test_plain_message_without_content_type_keeps_utf8() {
    let message = Message::parse("From: a@example.com\r\nSubject: x\r\n\r\ncafé crème\r\n").unwrap();
    assert_eq!(
        message.message_body(BodyKind::Text).unwrap().as_deref(),
        Some("café crème\r\n")
    );
}

#[test]
fn test_root_children_match_delimiters() {
    let text = concat!(
        "Content-Type: multipart/mixed; boundary=d\n\n",
        "preamble\n",
        "--d\n\none\n",
        "--d\n\ntwo\n",
        "--d\nContent-Type: text/html\n\n<i>three</i>\n",
        "--d\n\nfour\n",
        "--d--\n",
        "epilogue\n",
    );
    let delimiters = text.lines().filter(|line| line.starts_with("--d")).count();

    let message = Message::parse(text).unwrap();
    let tree = message.tree().unwrap();
    let root = tree.root();
    assert_eq!(root.children().len(), delimiters - 1);

    let spans: Vec<_> = tree.children(root).map(|part| part.body_span()).collect();
    for (i, a) in spans.iter().enumerate() {
        for b in &spans[i + 1..] {
            assert!(a.end <= b.start, "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn test_envelope_headers_in_order() {
    let text = "Received: from a\r\nFrom: x@example.com\r\nX-Mailer: test\r\nReceived: from b\r\n\r\nbody\r\n";
    let message = Message::parse(text).unwrap();
    let headers = message.headers().unwrap();

    let names: Vec<&str> = headers.iter().map(|field| field.name()).collect();
    assert_eq!(names, ["Received", "From", "X-Mailer", "Received"]);
    for name in ["received", "RECEIVED", "from", "x-MAILER"] {
        assert!(message.header(name).unwrap().is_some(), "{name}");
    }
    assert_eq!(headers.get_all("received"), ["from a", "from b"]);
}

#[test]
fn test_folded_header_unfolds() {
    let text = "Subject: first half\r\n\tsecond half\r\n\r\nbody\r\n";
    let message = Message::parse(text).unwrap();
    assert_eq!(
        message.header("subject").unwrap(),
        Some("first halfsecond half")
    );
}

#[test]
fn test_headers_without_blank_line_is_structural() {
    let mut message = Message::new();
    let result = message.attach_bytes("From: x@example.com\r\nSubject: cut\r\n");
    assert!(matches!(result, Err(Error::Structural(_))));
    assert!(!message.is_attached());
}

#[test]
fn test_unattached_is_not_parsed() {
    let message = Message::new();
    assert!(matches!(message.headers(), Err(Error::NotParsed)));
    assert!(matches!(message.raw_headers(), Err(Error::NotParsed)));
    assert!(matches!(message.attachments(), Err(Error::NotParsed)));
}

#[test]
fn test_attachments_idempotent() {
    let message = Message::parse(report()).unwrap();

    let first = message.attachments().unwrap();
    // Reading content in between must not change enumeration.
    let mut sink = Vec::new();
    first[0].copy_to(&mut sink).unwrap();

    let second = message.attachments().unwrap();
    assert_eq!(describe(&first), describe(&second));
}

fn describe(list: &[mimetree::Attachment<'_>]) -> Vec<(String, Option<String>, String)> {
    list.iter()
        .map(|a| (a.part_id().to_string(), a.filename().map(String::from), a.mime_type()))
        .collect()
}

#[test]
fn test_attach_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(report().as_bytes()).unwrap();
    file.flush().unwrap();

    let mut message = Message::new();
    message.attach_path(file.path()).unwrap();
    assert_eq!(message.header("subject").unwrap(), Some("Monthly report"));
    assert_eq!(
        message.attachments().unwrap()[0].read_to_vec().unwrap(),
        PDF_MAGIC
    );
}

#[test]
fn test_attach_missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut message = Message::new();
    let result = message.attach_path(dir.path().join("absent.eml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_attach_reader() {
    let mut message = Message::new();
    message.attach_reader(Cursor::new(report())).unwrap();

    assert!(message.is_attached());
    assert!(message.raw_headers().unwrap().starts_with("From: reports@example.com\r\n"));
    assert_eq!(
        message.message_body(BodyKind::Text).unwrap().as_deref(),
        Some("Hello")
    );
}

#[test]
fn test_staged_attachment_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let config = ParserConfig::builder()
        .staging(Staging::TempFile {
            dir: Some(dir.path().to_path_buf()),
        })
        .build();
    let mut message = Message::with_config(config);
    message.attach_bytes(report()).unwrap();

    {
        let attachments = message.attachments().unwrap();
        let mut content = attachments[0].content().unwrap();
        let mut data = Vec::new();
        content.read_to_end(&mut data).unwrap();
        assert_eq!(data, PDF_MAGIC);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_inline_and_content_id_parts() {
    let text = concat!(
        "Content-Type: multipart/related; boundary=rel\n\n",
        "--rel\nContent-Type: text/html\n\n<img src=\"cid:logo\">\n",
        "--rel\nContent-Type: image/png\nContent-ID: <logo>\nContent-Transfer-Encoding: base64\n\niVBORw0KGgo=\n",
        "--rel\nContent-Type: text/plain\nContent-Disposition: inline\n\nsignature\n",
        "--rel--\n",
    );
    let message = Message::parse(text).unwrap();
    let attachments = message.attachments().unwrap();

    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].content_id(), Some("<logo>"));
    assert_eq!(
        attachments[0].read_to_vec().unwrap(),
        [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]
    );
    assert_eq!(attachments[1].disposition(), Some(&DispositionKind::Inline));
    assert_eq!(attachments[1].read_to_vec().unwrap(), b"signature");
}

#[test]
fn test_rfc2231_filename() {
    let text = concat!(
        "Content-Type: multipart/mixed; boundary=f\n\n",
        "--f\n",
        "Content-Type: application/octet-stream\n",
        "Content-Disposition: attachment;\n",
        " filename*0*=utf-8''Gr%C3%BC%C3%9Fe;\n",
        " filename*1=\".txt\"\n",
        "\n",
        "data\n",
        "--f--\n",
    );
    let message = Message::parse(text).unwrap();
    let attachments = message.attachments().unwrap();
    assert_eq!(attachments[0].filename(), Some("Grüße.txt"));
}

#[test]
fn test_missing_filename_is_none() {
    let text = concat!(
        "Content-Type: multipart/mixed; boundary=n\n\n",
        "--n\nContent-Type: application/zip\nContent-Disposition: attachment\n\nPK\n",
        "--n--\n",
    );
    let message = Message::parse(text).unwrap();
    let attachments = message.attachments().unwrap();
    assert_eq!(attachments[0].filename(), None);
}

#[test]
fn test_unknown_transfer_encoding_passes_through() {
    let text = "Content-Transfer-Encoding: x-uuencode\n\nbegin 644 f\n";
    let message = Message::parse(text).unwrap();
    assert_eq!(
        message.part("1").unwrap().unwrap().transfer_encoding(),
        &TransferEncoding::Other("x-uuencode".to_string())
    );
    assert_eq!(
        message.message_body(BodyKind::Text).unwrap().as_deref(),
        Some("begin 644 f\n")
    );
}

#[test]
fn test_reattach_replaces_tree() {
    let mut message = Message::new();
    message.attach_bytes(report()).unwrap();
    assert_eq!(message.tree().unwrap().len(), 3);

    message.attach_bytes("Subject: second\n\nplain\n").unwrap();
    assert_eq!(message.tree().unwrap().len(), 1);
    assert_eq!(message.header("subject").unwrap(), Some("second"));
}

fn decode_in_chunks(input: &[u8], encoding: &TransferEncoding, chunk: usize) -> Vec<u8> {
    let mut decoder = Decoder::new(encoding);
    let mut out = Vec::new();
    for piece in input.chunks(chunk) {
        decoder.feed(piece, &mut out);
    }
    decoder.finish(&mut out);
    out
}

fn wrap_lines(text: &str, width: usize) -> String {
    text.as_bytes()
        .chunks(width)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

proptest! {
    #[test]
    fn prop_base64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let encoded = wrap_lines(&STANDARD.encode(&data), 76);
        prop_assert_eq!(decode(encoded.as_bytes(), &TransferEncoding::Base64), data);
    }

    #[test]
    fn prop_base64_chunked_matches_whole(
        data in proptest::collection::vec(any::<u8>(), 0..256),
        chunk in 1usize..16,
    ) {
        let encoded = wrap_lines(&STANDARD.encode(&data), 60);
        let whole = decode(encoded.as_bytes(), &TransferEncoding::Base64);
        prop_assert_eq!(decode_in_chunks(encoded.as_bytes(), &TransferEncoding::Base64, chunk), whole);
    }

    #[test]
    fn prop_quoted_printable_chunked_matches_whole(
        input in "([a-z =]|=[0-9A-F]{2}|=\r\n|\r\n){0,64}",
        chunk in 1usize..8,
    ) {
        let encoding = TransferEncoding::QuotedPrintable;
        let whole = decode(input.as_bytes(), &encoding);
        prop_assert_eq!(decode_in_chunks(input.as_bytes(), &encoding, chunk), whole);
    }

    #[test]
    fn prop_attachment_content_round_trip(
        data in proptest::collection::vec(any::<u8>(), 1..300),
        chunk in 4usize..64,
    ) {
        let text = format!(
            "Content-Type: multipart/mixed; boundary=p\r\n\r\n--p\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=blob.bin\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}\r\n--p--\r\n",
            wrap_lines(&STANDARD.encode(&data), 76),
        );
        let mut message = Message::with_config(ParserConfig::builder().chunk_size(chunk).build());
        message.attach_bytes(text).unwrap();

        let attachments = message.attachments().unwrap();
        prop_assert_eq!(attachments.len(), 1);
        prop_assert_eq!(attachments[0].read_to_vec().unwrap(), data);
    }
}
