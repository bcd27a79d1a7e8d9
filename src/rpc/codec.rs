//! Newline-delimited frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────────────────────────┬──────┐
//! │ JSON payload (N B, UTF-8)│ '\n' │
//! └──────────────────────────┴──────┘
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete lines. A
//! single read may carry part of a line or several lines; callers keep
//! feeding the unconsumed tail until it is empty. A trailing `'\r'` is
//! stripped and blank lines are skipped.

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 4096;

const DELIMITER: u8 = b'\n';

/// Result of one [`FrameDecoder::feed`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A complete line, delimiter removed.
    Line(&'a [u8]),
    /// A line exceeded [`MAX_FRAME_SIZE`] and was discarded.
    Oversized { len: usize },
}

/// Decoder state machine.
enum DecoderState {
    /// Collecting a line into the buffer.
    Collecting,
    /// The buffer holds the line returned by the last call.
    Delivered,
    /// Discarding the rest of an oversized line.
    Skipping { len: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    buf: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Collecting,
            buf: Vec::with_capacity(256),
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns how many bytes of `data` were consumed and, when a line
    /// ended inside them, the frame. The frame borrows the decoder and
    /// is valid until the next call.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<Frame<'_>>) {
        if matches!(self.state, DecoderState::Delivered) {
            self.buf.clear();
            self.state = DecoderState::Collecting;
        }

        let Some(pos) = data.iter().position(|&b| b == DELIMITER) else {
            self.absorb(data);
            return (data.len(), None);
        };
        self.absorb(&data[..pos]);
        let consumed = pos + 1;

        if let DecoderState::Skipping { len } = self.state {
            self.state = DecoderState::Collecting;
            return (consumed, Some(Frame::Oversized { len }));
        }

        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
            return (consumed, None);
        }
        self.state = DecoderState::Delivered;
        (consumed, Some(Frame::Line(&self.buf)))
    }

    /// Reset decoder state (e.g. after the input was reopened).
    pub fn reset(&mut self) {
        self.state = DecoderState::Collecting;
        self.buf.clear();
    }

    fn absorb(&mut self, bytes: &[u8]) {
        match &mut self.state {
            DecoderState::Skipping { len } => *len += bytes.len(),
            DecoderState::Collecting | DecoderState::Delivered => {
                if self.buf.len() + bytes.len() > MAX_FRAME_SIZE {
                    self.state = DecoderState::Skipping {
                        len: self.buf.len() + bytes.len(),
                    };
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(bytes);
                }
            }
        }
    }
}

/// Encode a payload as one frame into `out`.
///
/// Returns `None` when the payload contains the delimiter or is larger
/// than [`MAX_FRAME_SIZE`].
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Option<usize> {
    if payload.len() > MAX_FRAME_SIZE || payload.contains(&DELIMITER) {
        return None;
    }
    out.extend_from_slice(payload);
    out.push(DELIMITER);
    Some(payload.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a whole buffer, collecting every line as a `String`.
    fn decode_all(dec: &mut FrameDecoder, mut data: &[u8]) -> Vec<Result<String, usize>> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let (used, frame) = dec.feed(data);
            match frame {
                Some(Frame::Line(l)) => out.push(Ok(String::from_utf8(l.to_vec()).unwrap())),
                Some(Frame::Oversized { len }) => out.push(Err(len)),
                None => {}
            }
            data = &data[used..];
        }
        out
    }

    #[test]
    fn several_lines_in_one_read() {
        let mut dec = FrameDecoder::new();
        let lines = decode_all(&mut dec, b"{\"a\":1}\n{\"b\":2}\r\n");
        assert_eq!(lines, vec![Ok("{\"a\":1}".into()), Ok("{\"b\":2}".into())]);
    }

    #[test]
    fn line_split_across_reads() {
        let mut dec = FrameDecoder::new();
        assert!(decode_all(&mut dec, b"{\"COMM").is_empty());
        assert_eq!(decode_all(&mut dec, b"AND\":1}\n"), vec![Ok("{\"COMMAND\":1}".into())]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut dec = FrameDecoder::new();
        assert_eq!(decode_all(&mut dec, b"\n  \r\nx\n"), vec![Ok("x".into())]);
    }

    #[test]
    fn oversized_line_is_reported_then_decoding_resumes() {
        let mut dec = FrameDecoder::new();
        let mut data = vec![b'x'; MAX_FRAME_SIZE + 10];
        data.extend_from_slice(b"\nok\n");
        assert_eq!(
            decode_all(&mut dec, &data),
            vec![Err(MAX_FRAME_SIZE + 10), Ok("ok".into())]
        );
    }

    #[test]
    fn reset_drops_partial_line() {
        let mut dec = FrameDecoder::new();
        decode_all(&mut dec, b"garbage");
        dec.reset();
        assert_eq!(decode_all(&mut dec, b"ok\n"), vec![Ok("ok".into())]);
    }

    #[test]
    fn encode_appends_delimiter() {
        let mut out = Vec::new();
        assert_eq!(encode_frame(b"{}", &mut out), Some(3));
        assert_eq!(out, b"{}\n");
        assert_eq!(encode_frame(b"a\nb", &mut out), None);
    }
}
