//! End-to-end tests for streaming MIME generation.
//!
//! These drive complete message trees through the public API and compare
//! the produced bytes with known-good wire output.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor, Read};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;

use mailledger_mime_stream::encoding::{CRLF, encode_word};
use mailledger_mime_stream::{
    BoundaryGenerator, ByteSource, Error, Message, MessageStream, MultipartMessage, QpMode,
    ReaderSource, TransferEncoding, Transcoder,
};

const LOREM: &str = concat!(
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Ut elit eros,",
    " viverra in laoreet nec, iaculis in libero. Duis id velit quis enim lo",
    "bortis bibendum. Sed purus nisl, luctus et pharetra vel, condimentum q",
    "uis ipsum. Ut scelerisque molestie ligula id aliquet. Curabitur fringi",
    "lla metus eu dui consectetur aliquet. Aenean euismod eros tempor liber",
    "o facilisis vitae rutrum arcu ultricies. Fusce vel elit sit amet velit",
    " lobortis scelerisque vel nec orci. Ut eu sapien quis magna imperdiet ",
    "mattis sed sit amet diam. Maecenas id ipsum erat, eu tristique dolor. ",
    "Pellentesque aliquet mi eu quam sodales cursus. Nulla erat risus, inte",
    "rdum vitae commodo sed, viverra in risus. Nam molestie cursus neque, u",
    "t venenatis nibh fringilla quis.\n\nAliquam in sem neque. Nullam sceleri",
    "sque ligula porttitor nunc semper scelerisque. Proin urna diam, conseq",
    "uat quis accumsan in, suscipit a diam. In laoreet interdum nunc, et fr",
    "ingilla arcu volutpat varius. Sed lorem odio, sagittis vel iaculis con",
    "gue, convallis non tellus. Suspendisse consectetur aliquam feugiat. Qu",
    "isque luctus sollicitudin eros in tempor. Suspendisse sit amet risus u",
    "rna, fringilla tempus nibh. Praesent aliquam euismod erat ac congue. P",
    "hasellus neque nibh, sodales vitae tincidunt et, blandit a dui.",
);

const LOREM_QP: &str = concat!(
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Ut elit eros, vive=\r\n",
    "rra in laoreet nec, iaculis in libero. Duis id velit quis enim lobortis bib=\r\n",
    "endum. Sed purus nisl, luctus et pharetra vel, condimentum quis ipsum. Ut s=\r\n",
    "celerisque molestie ligula id aliquet. Curabitur fringilla metus eu dui con=\r\n",
    "sectetur aliquet. Aenean euismod eros tempor libero facilisis vitae rutrum =\r\n",
    "arcu ultricies. Fusce vel elit sit amet velit lobortis scelerisque vel nec =\r\n",
    "orci. Ut eu sapien quis magna imperdiet mattis sed sit amet diam. Maecenas =\r\n",
    "id ipsum erat, eu tristique dolor. Pellentesque aliquet mi eu quam sodales =\r\n",
    "cursus. Nulla erat risus, interdum vitae commodo sed, viverra in risus. Nam=\r\n",
    " molestie cursus neque, ut venenatis nibh fringilla quis.\r\n",
    "\r\n",
    "Aliquam in sem neque. Nullam scelerisque ligula porttitor nunc semper scele=\r\n",
    "risque. Proin urna diam, consequat quis accumsan in, suscipit a diam. In la=\r\n",
    "oreet interdum nunc, et fringilla arcu volutpat varius. Sed lorem odio, sag=\r\n",
    "ittis vel iaculis congue, convallis non tellus. Suspendisse consectetur ali=\r\n",
    "quam feugiat. Quisque luctus sollicitudin eros in tempor. Suspendisse sit a=\r\n",
    "met risus urna, fringilla tempus nibh. Praesent aliquam euismod erat ac con=\r\n",
    "gue. Phasellus neque nibh, sodales vitae tincidunt et, blandit a dui.",
);

const LOREM_BASE64: &str = concat!(
    "TG9yZW0gaXBzdW0gZG9sb3Igc2l0IGFtZXQsIGNvbnNlY3RldHVyIGFkaXBpc2NpbmcgZWxpdC4g\r\n",
    "VXQgZWxpdCBlcm9zLCB2aXZlcnJhIGluIGxhb3JlZXQgbmVjLCBpYWN1bGlzIGluIGxpYmVyby4g\r\n",
    "RHVpcyBpZCB2ZWxpdCBxdWlzIGVuaW0gbG9ib3J0aXMgYmliZW5kdW0uIFNlZCBwdXJ1cyBuaXNs\r\n",
    "LCBsdWN0dXMgZXQgcGhhcmV0cmEgdmVsLCBjb25kaW1lbnR1bSBxdWlzIGlwc3VtLiBVdCBzY2Vs\r\n",
    "ZXJpc3F1ZSBtb2xlc3RpZSBsaWd1bGEgaWQgYWxpcXVldC4gQ3VyYWJpdHVyIGZyaW5naWxsYSBt\r\n",
    "ZXR1cyBldSBkdWkgY29uc2VjdGV0dXIgYWxpcXVldC4gQWVuZWFuIGV1aXNtb2QgZXJvcyB0ZW1w\r\n",
    "b3IgbGliZXJvIGZhY2lsaXNpcyB2aXRhZSBydXRydW0gYXJjdSB1bHRyaWNpZXMuIEZ1c2NlIHZl\r\n",
    "bCBlbGl0IHNpdCBhbWV0IHZlbGl0IGxvYm9ydGlzIHNjZWxlcmlzcXVlIHZlbCBuZWMgb3JjaS4g\r\n",
    "VXQgZXUgc2FwaWVuIHF1aXMgbWFnbmEgaW1wZXJkaWV0IG1hdHRpcyBzZWQgc2l0IGFtZXQgZGlh\r\n",
    "bS4gTWFlY2VuYXMgaWQgaXBzdW0gZXJhdCwgZXUgdHJpc3RpcXVlIGRvbG9yLiBQZWxsZW50ZXNx\r\n",
    "dWUgYWxpcXVldCBtaSBldSBxdWFtIHNvZGFsZXMgY3Vyc3VzLiBOdWxsYSBlcmF0IHJpc3VzLCBp\r\n",
    "bnRlcmR1bSB2aXRhZSBjb21tb2RvIHNlZCwgdml2ZXJyYSBpbiByaXN1cy4gTmFtIG1vbGVzdGll\r\n",
    "IGN1cnN1cyBuZXF1ZSwgdXQgdmVuZW5hdGlzIG5pYmggZnJpbmdpbGxhIHF1aXMuCgpBbGlxdWFt\r\n",
    "IGluIHNlbSBuZXF1ZS4gTnVsbGFtIHNjZWxlcmlzcXVlIGxpZ3VsYSBwb3J0dGl0b3IgbnVuYyBz\r\n",
    "ZW1wZXIgc2NlbGVyaXNxdWUuIFByb2luIHVybmEgZGlhbSwgY29uc2VxdWF0IHF1aXMgYWNjdW1z\r\n",
    "YW4gaW4sIHN1c2NpcGl0IGEgZGlhbS4gSW4gbGFvcmVldCBpbnRlcmR1bSBudW5jLCBldCBmcmlu\r\n",
    "Z2lsbGEgYXJjdSB2b2x1dHBhdCB2YXJpdXMuIFNlZCBsb3JlbSBvZGlvLCBzYWdpdHRpcyB2ZWwg\r\n",
    "aWFjdWxpcyBjb25ndWUsIGNvbnZhbGxpcyBub24gdGVsbHVzLiBTdXNwZW5kaXNzZSBjb25zZWN0\r\n",
    "ZXR1ciBhbGlxdWFtIGZldWdpYXQuIFF1aXNxdWUgbHVjdHVzIHNvbGxpY2l0dWRpbiBlcm9zIGlu\r\n",
    "IHRlbXBvci4gU3VzcGVuZGlzc2Ugc2l0IGFtZXQgcmlzdXMgdXJuYSwgZnJpbmdpbGxhIHRlbXB1\r\n",
    "cyBuaWJoLiBQcmFlc2VudCBhbGlxdWFtIGV1aXNtb2QgZXJhdCBhYyBjb25ndWUuIFBoYXNlbGx1\r\n",
    "cyBuZXF1ZSBuaWJoLCBzb2RhbGVzIHZpdGFlIHRpbmNpZHVudCBldCwgYmxhbmRpdCBhIGR1aS4=\r\n",
);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pulls the stream dry using buffers of `chunk_size` bytes.
fn drain<S: ByteSource>(stream: &mut S, chunk_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let chunk = stream.pull(&mut buf).unwrap();
        out.extend_from_slice(&buf[..chunk.written]);
        if chunk.is_end() {
            return out;
        }
    }
}

fn drain_string(stream: &mut MessageStream, chunk_size: usize) -> String {
    String::from_utf8(drain(stream, chunk_size)).unwrap()
}

/// Decodes Quoted-Printable output that contains only soft line breaks.
fn decode_quoted_printable(encoded: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut i = 0;
    while i < encoded.len() {
        if encoded[i] == b'=' {
            if encoded[i + 1..].starts_with(b"\r\n") {
                i += 3;
                continue;
            }
            let hex = std::str::from_utf8(&encoded[i + 1..i + 3]).unwrap();
            result.push(u8::from_str_radix(hex, 16).unwrap());
            i += 3;
        } else {
            result.push(encoded[i]);
            i += 1;
        }
    }
    result
}

/// Reads `data`, then fails.
struct TruncatedReader {
    data: Cursor<Vec<u8>>,
}

impl Read for TruncatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body truncated")),
            n => Ok(n),
        }
    }
}

fn hello_alternative() -> MultipartMessage {
    let mut message = MultipartMessage::builder("alternative").boundary("B1").build();
    message.set_header("Subject", "Test");
    message.add_part(
        Message::text(QpMode::UnixText, Cursor::new("Hello, world!"))
            .with_header("Content-Type", "text/plain"),
    );
    message.add_part(
        Message::binary(Cursor::new("Hello, world!"))
            .with_header("Content-Type", "application/octet-stream"),
    );
    message
}

fn lorem_alternative(generator: &BoundaryGenerator) -> MultipartMessage {
    let mut message = MultipartMessage::builder("alternative")
        .generator(generator)
        .build();
    message
        .set_header("Subject", encode_word("昨日の会議"))
        .set_header("From", format!("{} <miller@example.com>", encode_word("Miller")))
        .set_header("To", format!("{} <tanaka@example.com>", encode_word("田中")));

    message.add_part(
        Message::text(QpMode::UnixText, Cursor::new(LOREM))
            .with_header("Content-Type", "text/plain"),
    );
    message.add_part(
        Message::binary(Cursor::new(LOREM))
            .with_header("Content-Type", "application/octet-stream"),
    );
    message
}

#[test]
fn test_hello_alternative() {
    init_tracing();
    let out = drain_string(&mut hello_alternative().into_stream(), 4096);
    assert_eq!(
        out,
        concat!(
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"B1\"\r\n",
            "Subject: Test\r\n",
            "\r\n",
            "--B1\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Hello, world!\r\n",
            "--B1\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "SGVsbG8sIHdvcmxkIQ==\r\n",
            "--B1--\r\n",
        )
    );
}

#[test]
fn test_lorem_alternative() {
    init_tracing();
    let generator = BoundaryGenerator::new("Test");
    let out = drain_string(&mut lorem_alternative(&generator).into_stream(), 4096);

    let expected = format!(
        concat!(
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"==TestBoundary:0.\"\r\n",
            "Subject: =?UTF-8?Q?=E6=98=A8=E6=97=A5=E3=81=AE=E4=BC=9A=E8=AD=B0?=\r\n",
            "From: Miller <miller@example.com>\r\n",
            "To: =?UTF-8?Q?=E7=94=B0=E4=B8=AD?= <tanaka@example.com>\r\n",
            "\r\n",
            "--==TestBoundary:0.\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "{qp}\r\n",
            "--==TestBoundary:0.\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "{b64}\r\n",
            "--==TestBoundary:0.--\r\n",
        ),
        qp = LOREM_QP,
        b64 = LOREM_BASE64,
    );
    assert_eq!(out, expected);
}

#[test]
fn test_full_base64_line_before_close_delimiter() {
    for size in [1, 76, 4096] {
        let mut message = MultipartMessage::builder("mixed").boundary("b").build();
        message.add_part(Message::binary(Cursor::new(vec![b'x'; 57])));
        let out = drain_string(&mut message.into_stream(), size);
        assert!(
            out.ends_with(&format!("\r\n\r\n{}\r\n\r\n--b--\r\n", "eHh4".repeat(19))),
            "chunk size {size}: {out:?}"
        );
    }
}

#[test]
fn test_multipart_without_parts() {
    let message = MultipartMessage::builder("mixed").boundary("b").build();
    let out = drain_string(&mut message.into_stream(), 5);
    assert_eq!(
        out,
        "MIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"b\"\r\n\r\n--b\r\n"
    );
}

#[test]
fn test_output_independent_of_chunk_size() {
    let generator = BoundaryGenerator::new("Test");
    let whole = drain(&mut lorem_alternative(&generator).into_stream(), 1 << 16);

    for size in [1, 2, 3, 7, 76, 77, 78, 1000] {
        let generator = BoundaryGenerator::new("Test");
        let chunked = drain(&mut lorem_alternative(&generator).into_stream(), size);
        assert_eq!(chunked, whole, "chunk size {size}");
    }
}

#[test]
fn test_io_read_matches_pull() {
    let mut via_read = Vec::new();
    io::copy(&mut hello_alternative().into_stream(), &mut via_read).unwrap();
    let via_pull = drain(&mut hello_alternative().into_stream(), 4096);
    assert_eq!(via_read, via_pull);
}

#[test]
fn test_nested_multipart_inherits_eol() {
    init_tracing();
    let mut alternative = MultipartMessage::builder("alternative").boundary("inner").build();
    alternative.add_part(
        Message::text(QpMode::UnixText, Cursor::new("a\nb"))
            .with_header("Content-Type", "text/plain"),
    );

    let mut mixed = MultipartMessage::builder("mixed").boundary("outer").build();
    mixed.set_eol("\n");
    mixed.add_part(alternative);
    mixed.add_part(
        Message::binary(Cursor::new(vec![0u8; 60]))
            .with_header("Content-Type", "application/octet-stream"),
    );

    let out = drain_string(&mut mixed.into_stream(), 13);
    let expected = format!(
        concat!(
            "MIME-Version: 1.0\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\n",
            "\n",
            "--outer\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\n",
            "\n",
            "--inner\n",
            "Content-Transfer-Encoding: quoted-printable\n",
            "Content-Type: text/plain\n",
            "\n",
            "a\nb\n",
            "--inner--\n",
            "\n",
            "--outer\n",
            "Content-Transfer-Encoding: base64\n",
            "Content-Type: application/octet-stream\n",
            "\n",
            "{line}\n",
            "AAAA\n",
            "--outer--\n",
        ),
        line = "A".repeat(76),
    );
    assert_eq!(out, expected);
}

#[test]
fn test_binary_part_fails_before_any_byte() {
    let mut message = MultipartMessage::builder("mixed").boundary("b").build();
    message.add_part(Message::new(TransferEncoding::Binary, Cursor::new("raw")));

    let mut stream = message.into_stream();
    let mut buf = [0u8; 256];
    let err = stream.pull(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        Error::PartInvalidTransferEncoding(TransferEncoding::Binary)
    ));
    assert!(matches!(stream.pull(&mut buf), Err(Error::Aborted)));
}

#[test]
fn test_eight_bit_nested_part_fails() {
    let mut inner = MultipartMessage::builder("alternative").boundary("i").build();
    inner.add_part(Message::new(TransferEncoding::EightBit, Cursor::new("x")));
    let mut outer = MultipartMessage::builder("mixed").boundary("o").build();
    outer.add_part(inner);

    let mut out = Vec::new();
    let err = outer.into_stream().read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert!(out.is_empty());
}

#[test]
fn test_multipart_base64_rejected() {
    let mut message = hello_alternative();
    message.set_transfer_encoding(TransferEncoding::QuotedPrintable);
    let mut buf = [0u8; 64];
    assert!(matches!(
        message.into_stream().pull(&mut buf),
        Err(Error::MultipartInvalidTransferEncoding)
    ));
}

#[test]
fn test_fault_propagates_through_multipart() {
    init_tracing();
    let mut message = MultipartMessage::builder("mixed").boundary("b").build();
    message.add_part(Message::new(
        TransferEncoding::SevenBit,
        Cursor::new("first part"),
    ));
    message.add_part(Message::binary(TruncatedReader {
        data: Cursor::new(b"abcdef".to_vec()),
    }));

    let mut out = Vec::new();
    let err = message.into_stream().read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

    let produced = String::from_utf8(out).unwrap();
    assert!(produced.starts_with("MIME-Version: 1.0\r\n"));
    assert!(produced.contains("first part\r\n--b\r\n"));
    assert!(produced.ends_with("YWJjZGVm"));
}

#[test]
fn test_exhausted_stream_stays_exhausted() {
    let mut stream = hello_alternative().into_stream();
    let _ = drain(&mut stream, 10);
    assert!(stream.is_done());

    let mut buf = [0u8; 32];
    for _ in 0..5 {
        let chunk = stream.pull(&mut buf).unwrap();
        assert_eq!(chunk.written, 0);
        assert!(chunk.is_end());
    }
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_generated_boundaries_are_unique() {
    let a = MultipartMessage::new("mixed");
    let b = MultipartMessage::new("mixed");
    assert_ne!(a.boundary(), b.boundary());
    assert!(a.boundary().starts_with("=="));
}

proptest! {
    #[test]
    fn prop_chunk_size_does_not_change_output(chunk in 1usize..600) {
        let whole = drain(&mut hello_alternative().into_stream(), 1 << 16);
        let chunked = drain(&mut hello_alternative().into_stream(), chunk);
        prop_assert_eq!(chunked, whole);
    }

    #[test]
    fn prop_base64_lines_and_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk in 1usize..300,
    ) {
        let mut transcoder = Transcoder::base64(ReaderSource::new(Cursor::new(data.clone())), CRLF);
        let out = String::from_utf8(drain(&mut transcoder, chunk)).unwrap();

        let lines: Vec<&str> = out.split("\r\n").collect();
        if let Some((last, full)) = lines.split_last() {
            for line in full {
                prop_assert_eq!(line.len(), 76);
            }
            // A full final line is terminated, a short one is not
            prop_assert!(last.len() < 76);
        }
        prop_assert_eq!(STANDARD.decode(lines.concat()).unwrap(), data);
    }

    #[test]
    fn prop_quoted_printable_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk in 1usize..300,
    ) {
        let mut transcoder = Transcoder::quoted_printable(
            ReaderSource::new(Cursor::new(data.clone())),
            QpMode::Binary,
            CRLF,
        );
        let out = drain(&mut transcoder, chunk);

        for line in out.split(|&b| b == b'\n') {
            prop_assert!(line.len() <= 77, "line too long: {}", line.len());
        }
        prop_assert_eq!(decode_quoted_printable(&out), data);
    }
}
