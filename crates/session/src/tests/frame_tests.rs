use super::*;

#[test]
fn encodes_big_endian_header_length() {
    let frame = encode_frame(r#"{"event_type":"play"}"#).expect("encode");
    let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let header: serde_json::Value =
        serde_json::from_slice(&frame[2..2 + header_len]).expect("header json");
    assert_eq!(header["content-encoding"], "utf-8");
    assert_eq!(header["content-length"], 21);
    assert_eq!(&frame[2 + header_len..], br#"{"event_type":"play"}"#);
}

#[test]
fn decodes_frame_split_across_pushes() {
    let frame = encode_frame(r#"{"event_type":"waiting"}"#).expect("encode");
    let mut decoder = FrameDecoder::new();

    for chunk in frame.chunks(3) {
        assert!(decoder.next_frame().expect("partial").is_none());
        decoder.push(chunk);
    }

    assert_eq!(
        decoder.next_frame().expect("decode").as_deref(),
        Some(r#"{"event_type":"waiting"}"#)
    );
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn decodes_merged_frames_in_order() {
    let mut bytes = encode_frame(r#"{"event_type":"waiting"}"#).expect("first");
    bytes.extend(encode_frame(r#"{"event_type":"ready"}"#).expect("second"));

    let mut decoder = FrameDecoder::new();
    decoder.push(&bytes);
    assert_eq!(
        decoder.next_frame().expect("first").as_deref(),
        Some(r#"{"event_type":"waiting"}"#)
    );
    assert_eq!(
        decoder.next_frame().expect("second").as_deref(),
        Some(r#"{"event_type":"ready"}"#)
    );
    assert!(decoder.next_frame().expect("empty").is_none());
}

#[test]
fn rejects_unsupported_encoding() {
    let header = br#"{"byteorder":"little","content-type":"text/json","content-encoding":"utf-32","content-length":2}"#;
    let mut bytes = (header.len() as u16).to_be_bytes().to_vec();
    bytes.extend_from_slice(header);
    bytes.extend_from_slice(b"{}");

    let mut decoder = FrameDecoder::new();
    decoder.push(&bytes);
    let err = decoder.next_frame().expect_err("utf-32");
    assert!(matches!(err, FrameError::UnsupportedEncoding(ref enc) if enc == "utf-32"));
}
