use super::*;

#[test]
fn test_encode_prepends_length() {
    let framed = encode_frame(b"hello");
    assert_eq!(framed, vec![0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);
}

#[test]
fn test_decode_single_frame() {
    let mut d = FrameDecoder::new();
    let frames = d.push(&encode_frame(b"hello"));
    assert_eq!(frames, vec![b"hello".to_vec()]);
    assert_eq!(d.consumed_size(), 7);
    assert_eq!(d.pending(), 0);
}

#[test]
fn test_decode_across_arbitrary_splits() {
    let mut wire = vec![];
    wire.extend_from_slice(&encode_frame(b"first"));
    wire.extend_from_slice(&encode_frame(b""));
    wire.extend_from_slice(&encode_frame(b"second frame"));

    // feed the stream one byte at a time
    let mut d = FrameDecoder::new();
    let mut frames = vec![];
    for b in &wire {
        frames.extend(d.push(std::slice::from_ref(b)));
    }
    assert_eq!(
        frames,
        vec![b"first".to_vec(), b"".to_vec(), b"second frame".to_vec()]
    );

    // and in a handful of ragged chunks
    let mut d = FrameDecoder::new();
    let mut frames = vec![];
    for chunk in wire.chunks(3) {
        frames.extend(d.push(chunk));
    }
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2], b"second frame".to_vec());
}

#[test]
fn test_partial_frame_does_not_block() {
    let mut d = FrameDecoder::new();
    let framed = encode_frame(&vec![0xAB; 100]);

    assert!(d.push(&framed[..50]).is_empty());
    assert_eq!(d.pending(), 48); // 50 minus the 2-byte header
    assert_eq!(d.consumed_size(), 0);

    // a later chunk completes the frame and a following one in one push
    let mut rest = framed[50..].to_vec();
    rest.extend_from_slice(&encode_frame(b"tail"));
    let frames = d.push(&rest);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 100);
    assert_eq!(frames[1], b"tail".to_vec());
}

#[test]
fn test_two_frames_in_one_chunk() {
    let mut wire = encode_frame(b"a");
    wire.extend_from_slice(&encode_frame(b"bb"));

    let mut d = FrameDecoder::new();
    let frames = d.push(&wire);
    assert_eq!(frames, vec![b"a".to_vec(), b"bb".to_vec()]);
    assert_eq!(d.consumed_size(), 3 + 4);
}
