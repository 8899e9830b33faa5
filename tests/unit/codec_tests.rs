//! Line framing for the machine-mode stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use csend_bridge::machine::codec::{MachineCodec, MAX_LINE_BYTES};

#[test]
fn complete_line_is_returned_without_newline() {
    let mut codec = MachineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"ready\"}\n");

    let line = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(line.as_deref(), Some("{\"type\":\"ready\"}"));
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = MachineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"re");

    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"ady\"}\n");
    let line = codec.decode(&mut buf).expect("decode");
    assert_eq!(line.as_deref(), Some("{\"type\":\"ready\"}"));
}

#[test]
fn crlf_terminator_is_stripped() {
    let mut codec = MachineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"start\"}\r\n");

    let line = codec.decode(&mut buf).expect("decode");

    assert_eq!(line.as_deref(), Some("{\"type\":\"start\"}"));
}

#[test]
fn over_long_line_is_dropped_and_next_line_decodes() {
    let mut codec = MachineCodec::with_max_length(16);
    let mut buf = BytesMut::from(&b"0123456789abcdefXYZ\n{\"type\":\"a\"}\n"[..]);

    let line = codec.decode(&mut buf).expect("over-long line is not an error");

    assert_eq!(line.as_deref(), Some("{\"type\":\"a\"}"));
    assert_eq!(codec.discarded(), 1);
}

#[test]
fn invalid_utf8_line_is_dropped() {
    let mut codec = MachineCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe\n{}\n"[..]);

    let line = codec.decode(&mut buf).expect("bad bytes are not an error");

    assert_eq!(line.as_deref(), Some("{}"));
    assert_eq!(codec.discarded(), 1);
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
}

#[test]
fn encoder_appends_single_newline() {
    let mut codec = MachineCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("/status --id=cmd_1".to_owned(), &mut buf)
        .expect("encode");

    assert_eq!(&buf[..], b"/status --id=cmd_1\n");
}
