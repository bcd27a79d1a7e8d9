//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences through the line decoder in one go
//! and split at an arbitrary point, and asserts that both yield the same
//! frames, that no line exceeds the frame limit and that no delivered
//! line is blank or carries its delimiter.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use wellkeeper::rpc::codec::{Frame, FrameDecoder, MAX_FRAME_SIZE};

#[derive(Debug, PartialEq)]
enum Out {
    Line(Vec<u8>),
    Oversized,
}

fn run(decoder: &mut FrameDecoder, mut data: &[u8], out: &mut Vec<Out>) {
    while !data.is_empty() {
        let (used, frame) = decoder.feed(data);
        assert!(used > 0 && used <= data.len());
        match frame {
            Some(Frame::Line(line)) => {
                assert!(line.len() <= MAX_FRAME_SIZE, "line exceeds MAX_FRAME_SIZE");
                assert!(!line.contains(&b'\n'));
                assert!(!line.iter().all(u8::is_ascii_whitespace));
                out.push(Out::Line(line.to_vec()));
            }
            Some(Frame::Oversized { len }) => {
                assert!(len > MAX_FRAME_SIZE);
                out.push(Out::Oversized);
            }
            None => {}
        }
        data = &data[used..];
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };

    let mut whole = Vec::new();
    run(&mut FrameDecoder::new(), data, &mut whole);

    let cut = usize::from(split).min(data.len());
    let mut pieces = Vec::new();
    let mut decoder = FrameDecoder::new();
    run(&mut decoder, &data[..cut], &mut pieces);
    run(&mut decoder, &data[cut..], &mut pieces);
    assert_eq!(whole, pieces);

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    run(&mut decoder, data, &mut Vec::new());
});
