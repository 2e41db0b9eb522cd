//! Byte-stuffed (SLIP-style) framing with stream resynchronization.
//!
//! Frames are delimited purely by `END` bytes; there is no length prefix,
//! so a fresh `END` always starts an unambiguous new frame boundary even
//! after upstream corruption.

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 8192;

/// Encode `raw` as a complete SLIP frame: `END || escape(raw) || END`.
pub fn encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() * 2 + 2);
    out.push(END);
    for &b in raw {
        match b {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            other => out.push(other),
        }
    }
    out.push(END);
    out
}

/// Stateful streaming decoder: feed it arbitrary byte chunks and it
/// yields every frame it completes along the way, surviving splits at
/// any byte boundary and resynchronizing after garbage.
pub struct FrameDecoder {
    buf: Vec<u8>,
    escape: bool,
    overflow: bool,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            escape: false,
            overflow: false,
            max_frame_size,
        }
    }

    /// Feed a chunk of raw bytes, returning every frame completed while
    /// processing it, in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &b in data {
            match b {
                END => {
                    if self.overflow {
                        self.buf.clear();
                    } else if !self.buf.is_empty() {
                        frames.push(std::mem::take(&mut self.buf));
                    }
                    self.escape = false;
                    self.overflow = false;
                }
                _ if self.escape => {
                    let translated = match b {
                        ESC_END => END,
                        ESC_ESC => ESC,
                        other => other,
                    };
                    self.push(translated);
                    self.escape = false;
                }
                ESC => self.escape = true,
                other => self.push(other),
            }
        }
        frames
    }

    /// Append a byte to the in-progress frame, or mark it for discard if
    /// it would grow past `max_frame_size` - once `overflow` is set, the
    /// whole accumulator is dropped at the next `END` instead of being
    /// emitted truncated.
    fn push(&mut self, b: u8) {
        if self.buf.len() < self.max_frame_size {
            self.buf.push(b);
        } else {
            self.overflow = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_encodes_as_two_end_bytes() {
        assert_eq!(encode(&[]), vec![END, END]);
    }

    #[test]
    fn round_trip_arbitrary_bytes() {
        for raw in [&b""[..], b"Hello", &[0xC0, 0xDB, 0xC0], &[0u8; 300]] {
            let mut dec = FrameDecoder::default();
            let frames = dec.feed(&encode(raw));
            assert_eq!(frames, vec![raw.to_vec()]);
        }
    }

    #[test]
    fn split_at_any_boundary_still_decodes() {
        let raw = b"split me across calls";
        let encoded = encode(raw);
        for i in 0..=encoded.len() {
            let mut dec = FrameDecoder::default();
            let mut frames = dec.feed(&encoded[..i]);
            frames.extend(dec.feed(&encoded[i..]));
            assert_eq!(frames, vec![raw.to_vec()], "split at {i}");
        }
    }

    #[test]
    fn garbage_prefix_does_not_bleed_into_next_frame() {
        let raw = b"clean frame";
        let mut garbage = vec![0xAA, 0xBB, ESC, 0x11];
        garbage.extend(encode(raw));
        let mut dec = FrameDecoder::default();
        let frames = dec.feed(&garbage);
        assert_eq!(frames, vec![raw.to_vec()]);
    }

    #[test]
    fn oversized_frame_is_dropped_entirely() {
        let mut dec = FrameDecoder::new(4);
        let raw = b"too long for the frame";
        let frames = dec.feed(&encode(raw));
        assert!(frames.is_empty());
    }

    #[test]
    fn delimiter_bytes_in_payload_are_escaped() {
        let raw = [0xC0, 0xDB, 0xC0];
        let encoded = encode(&raw);
        assert_eq!(encoded[0], END);
        assert_eq!(*encoded.last().unwrap(), END);
        let body = &encoded[1..encoded.len() - 1];
        assert_eq!(body, &[ESC, ESC_END, ESC, ESC_ESC, ESC, ESC_END]);

        let mut dec = FrameDecoder::default();
        let frames = dec.feed(&encoded);
        assert_eq!(frames, vec![raw.to_vec()]);
    }

    #[test]
    fn tolerates_unknown_escape_continuation_by_copying_literally() {
        let mut dec = FrameDecoder::default();
        let frames = dec.feed(&[END, ESC, 0x41, END]);
        assert_eq!(frames, vec![vec![0x41]]);
    }
}
