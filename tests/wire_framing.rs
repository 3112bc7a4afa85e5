//! Framing round-trip property: decoding a concatenation of encoded
//! frames yields exactly those frames, however the byte stream is
//! chunked.

use serde_json::{json, Value};

use m2m_fabric::wire::FrameDecoder;

fn encode_all(frames: &[Value]) -> Vec<u8> {
    let mut stream = Vec::new();
    for frame in frames {
        stream.extend_from_slice(serde_json::to_string(frame).unwrap().as_bytes());
        stream.push(b'\n');
    }
    stream
}

fn decode_chunked(stream: &[u8], chunk_size: usize) -> Vec<Value> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in stream.chunks(chunk_size) {
        decoder.feed(chunk);
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame.unwrap());
        }
    }
    frames
}

#[test]
fn test_chunking_never_changes_the_frames() {
    let frames = vec![
        json!({"action": "register", "correlationId": "0011223344556677", "capabilities": ["chat"]}),
        json!({"type": "message", "messageType": "hello", "data": "AAAA", "correlationId": "8899aabbccddeeff"}),
        json!({"status": "ok", "agents": [], "count": 0}),
        json!({"nested": {"deep": {"value": [1, 2, 3, {"x": "newline-free"}]}}}),
        json!({}),
    ];
    let stream = encode_all(&frames);

    for chunk_size in [1, 2, 3, 7, 16, 64, stream.len()] {
        assert_eq!(
            decode_chunked(&stream, chunk_size),
            frames,
            "chunk size {chunk_size}"
        );
    }
}

#[test]
fn test_large_frame_survives_fine_chunking() {
    let frames = vec![
        json!({"blob": "y".repeat(256 * 1024)}),
        json!({"after": true}),
    ];
    let stream = encode_all(&frames);

    // 4 KiB chunks across a 256 KiB frame
    assert_eq!(decode_chunked(&stream, 4096), frames);
}

#[test]
fn test_interleaved_garbage_only_loses_its_own_line() {
    let mut stream = Vec::new();
    stream.extend_from_slice(b"{\"ok\":1}\n");
    stream.extend_from_slice(b"%% garbage %%\n");
    stream.extend_from_slice(b"{\"ok\":2}\n");

    let mut decoder = FrameDecoder::new();
    decoder.feed(&stream);

    assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"ok": 1}));
    assert!(decoder.next_frame().unwrap().is_err());
    assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"ok": 2}));
    assert!(decoder.next_frame().is_none());
}
