//! # Frame codec
//!
//! The NX-584 wire protocol frames every message as:
//!
//! ```text
//! [0x7E][length][msg_type][data... (length-1 bytes)][cksum_lo][cksum_hi]
//! ```
//!
//! Everything after the start byte is byte-stuffed so that `0x7E` cannot
//! appear anywhere inside a frame body, and the two trailing checksum bytes
//! are a Fletcher-16 computed over the unstuffed `length..=last data byte`
//! range (inclusive of `msg_type`).

use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Frame start marker. Never appears unescaped inside a frame body.
pub const START_BYTE: u8 = 0x7E;
/// Escape marker used for byte stuffing.
pub const ESCAPE_BYTE: u8 = 0x7D;
/// `0x7E` is encoded as `ESCAPE_BYTE` followed by this byte.
const ESCAPED_START: u8 = 0x5E;
/// `0x7D` is encoded as `ESCAPE_BYTE` followed by this byte.
const ESCAPED_ESCAPE: u8 = 0x5D;

/// Bit in `msg_type` the sender sets to request an ACK from the panel.
pub const ACK_REQUEST_BIT: u8 = 0x80;
/// Mask isolating the 6-bit message code from `msg_type`.
pub const MSG_CODE_MASK: u8 = 0x3F;

/// Errors raised while decoding or validating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// No frame arrived before the read timeout elapsed.
    #[error("timed out waiting for a frame")]
    Timeout,
    /// A `0x7D` escape byte was not followed by `0x5E` or `0x5D`.
    #[error("invalid escape sequence")]
    BadEscape,
    /// The body length did not match the `length` byte, or exceeded the catalog's bound.
    #[error("invalid frame length")]
    BadLength,
    /// The trailing two bytes did not match the computed Fletcher-16 checksum.
    #[error("checksum mismatch")]
    BadChecksum,
    /// The message type was not present in the catalog.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    /// The underlying byte stream was closed.
    #[error("serial stream closed")]
    Closed,
}

/// Compute a Fletcher-16 checksum over `data`, returned as `(s1, s2)` in
/// wire order (low byte first).
pub fn fletcher16(data: &[u8]) -> (u8, u8) {
    let mut s1: u32 = 0;
    let mut s2: u32 = 0;
    for &b in data {
        s1 = (s1 + b as u32) % 255;
        s2 = (s2 + s1) % 255;
    }
    (s1 as u8, s2 as u8)
}

/// Verify that `data` is immediately followed by its own Fletcher-16
/// checksum (`data` does not include the checksum bytes).
pub fn fletcher16_verify(data: &[u8], cksum_lo: u8, cksum_hi: u8) -> bool {
    let (s1, s2) = fletcher16(data);
    s1 == cksum_lo && s2 == cksum_hi
}

/// Byte-stuff `body` (the bytes that would otherwise follow the start byte):
/// every `0x7E` becomes `0x7D 0x5E`, every `0x7D` becomes `0x7D 0x5D`.
pub fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    for &b in body {
        match b {
            START_BYTE => {
                out.push(ESCAPE_BYTE);
                out.push(ESCAPED_START);
            }
            ESCAPE_BYTE => {
                out.push(ESCAPE_BYTE);
                out.push(ESCAPED_ESCAPE);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Reverse [`stuff`]. Returns [`FrameError::BadEscape`] if a `0x7D` is not
/// followed by `0x5E` or `0x5D`.
pub fn unstuff(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().copied();
    while let Some(b) = iter.next() {
        if b == ESCAPE_BYTE {
            match iter.next() {
                Some(ESCAPED_START) => out.push(START_BYTE),
                Some(ESCAPED_ESCAPE) => out.push(ESCAPE_BYTE),
                _ => return Err(FrameError::BadEscape),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Build a complete, wire-ready outbound frame for `msg_type` and `data`,
/// byte-stuffed and checksummed, including the leading start byte.
pub fn encode_frame(msg_type: u8, data: &[u8]) -> Vec<u8> {
    let length = 1 + data.len() as u8;
    let mut unstuffed = Vec::with_capacity(2 + data.len() + 2);
    unstuffed.push(length);
    unstuffed.push(msg_type);
    unstuffed.extend_from_slice(data);
    let (s1, s2) = fletcher16(&unstuffed);
    unstuffed.push(s1);
    unstuffed.push(s2);

    let mut out = Vec::with_capacity(1 + unstuffed.len() * 2);
    out.push(START_BYTE);
    out.extend(stuff(&unstuffed));
    out
}

/// A decoded, validated inbound frame: message type (including the ACK bit,
/// if the sender set it) and its data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub msg_type: u8,
    pub data: Vec<u8>,
}

impl DecodedFrame {
    /// The 6-bit message code, with the ACK-request bit masked off.
    pub fn code(&self) -> u8 {
        self.msg_type & MSG_CODE_MASK
    }

    /// Whether the sender requested an ACK for this message.
    pub fn wants_ack(&self) -> bool {
        self.msg_type & ACK_REQUEST_BIT != 0
    }
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={:#04x} data={:02x?}", self.msg_type, self.data)
    }
}

/// Decode one unstuffed frame body (`length..=checksum_hi`, no start byte)
/// into a [`DecodedFrame`], verifying the length and checksum invariants.
///
/// `body` must already have been byte-unstuffed.
pub fn decode_unstuffed(body: &[u8]) -> Result<DecodedFrame, FrameError> {
    if body.len() < 4 {
        return Err(FrameError::BadLength);
    }
    let length = body[0] as usize;
    let msg_type = body[1];
    let data_len = length.checked_sub(1).ok_or(FrameError::BadLength)?;
    if body.len() != 2 + data_len + 2 {
        return Err(FrameError::BadLength);
    }
    let (cksum_lo, cksum_hi) = (body[body.len() - 2], body[body.len() - 1]);
    let unstuffed_payload = &body[..body.len() - 2];
    if !fletcher16_verify(unstuffed_payload, cksum_lo, cksum_hi) {
        return Err(FrameError::BadChecksum);
    }
    Ok(DecodedFrame {
        msg_type,
        data: body[2..2 + data_len].to_vec(),
    })
}

/// A byte source providing the blocking-read-with-timeout interface the
/// Controller needs. Implemented for the production serial handle and for
/// test doubles.
pub trait ByteSource {
    /// Read the next available byte, blocking up to `timeout` if `blocking`
    /// is set (a single attempt if not). Returns `Ok(None)` on timeout.
    fn read_byte(&mut self, timeout: Duration, blocking: bool) -> std::io::Result<Option<u8>>;

    /// Discard any buffered input. Called after a framing/checksum error so
    /// a partial or corrupted frame cannot bleed into the next read.
    fn flush_input(&mut self);
}

/// Frame reader built over a [`ByteSource`]: finds the next start byte,
/// reads and unstuffs the body, and validates it.
pub struct FrameReader<S> {
    source: S,
}

impl<S: ByteSource> FrameReader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Read one frame. `blocking` controls whether the initial wait for a
    /// start byte blocks for the full per-byte timeout or returns
    /// `Timeout` immediately if nothing is pending.
    ///
    /// On any `FrameError` the input buffer is flushed before returning —
    /// callers may retry freely without worrying about stale bytes.
    pub fn read_frame(
        &mut self,
        timeout: Duration,
        blocking: bool,
    ) -> Result<DecodedFrame, FrameError> {
        match self.read_frame_inner(timeout, blocking) {
            Ok(frame) => Ok(frame),
            Err(FrameError::Timeout) => Err(FrameError::Timeout),
            Err(e) => {
                self.source.flush_input();
                Err(e)
            }
        }
    }

    fn read_frame_inner(
        &mut self,
        timeout: Duration,
        blocking: bool,
    ) -> Result<DecodedFrame, FrameError> {
        let deadline = Instant::now() + timeout;

        // Scan for the start byte.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout);
            }
            match self
                .source
                .read_byte(remaining, blocking)
                .map_err(|_| FrameError::Closed)?
            {
                Some(START_BYTE) => break,
                Some(_) => continue,
                None => return Err(FrameError::Timeout),
            }
        }

        // Read and unstuff the body until we have a complete, checksummed
        // frame. We don't know the final length until stuffing is undone,
        // so we unstuff incrementally: read raw bytes (honoring escapes)
        // until we've recovered `length` unstuffed payload bytes plus the
        // two checksum bytes.
        let mut unstuffed: Vec<u8> = Vec::new();
        let mut pending_escape = false;
        let mut expected_total: Option<usize> = None;

        loop {
            if let Some(total) = expected_total {
                if unstuffed.len() >= total {
                    break;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout);
            }
            let raw = self
                .source
                .read_byte(remaining, true)
                .map_err(|_| FrameError::Closed)?
                .ok_or(FrameError::Timeout)?;

            if pending_escape {
                pending_escape = false;
                match raw {
                    ESCAPED_START => unstuffed.push(START_BYTE),
                    ESCAPED_ESCAPE => unstuffed.push(ESCAPE_BYTE),
                    _ => return Err(FrameError::BadEscape),
                }
            } else if raw == ESCAPE_BYTE {
                pending_escape = true;
                continue;
            } else if raw == START_BYTE {
                // A fresh start byte before we've finished the previous
                // frame means the previous frame was truncated; restart.
                unstuffed.clear();
                expected_total = None;
                continue;
            } else {
                unstuffed.push(raw);
            }

            if expected_total.is_none() && unstuffed.len() == 1 {
                // `length` counts msg_type + data; total unstuffed bytes to
                // collect is 1 (length) + 1 (msg_type) + (length-1) (data)
                // + 2 (cksum) = length + 3.
                let length = unstuffed[0] as usize;
                expected_total = Some(length + 3);
            }
        }
        if pending_escape {
            return Err(FrameError::BadEscape);
        }

        decode_unstuffed(&unstuffed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MemorySource {
        bytes: VecDeque<u8>,
        flushed: bool,
    }

    impl MemorySource {
        fn new(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.iter().copied().collect(),
                flushed: false,
            }
        }
    }

    impl ByteSource for MemorySource {
        fn read_byte(&mut self, _timeout: Duration, _blocking: bool) -> std::io::Result<Option<u8>> {
            Ok(self.bytes.pop_front())
        }

        fn flush_input(&mut self) {
            self.flushed = true;
            self.bytes.clear();
        }
    }

    #[test]
    fn fletcher16_roundtrip() {
        let body = b"\x06\x06\x00\x00\x00\x00\x00\x00";
        let (lo, hi) = fletcher16(body);
        assert!(fletcher16_verify(body, lo, hi));
        let mut corrupted = body.to_vec();
        corrupted[2] ^= 0x01;
        assert!(!fletcher16_verify(&corrupted, lo, hi));
    }

    #[test]
    fn stuffing_roundtrip_has_no_bare_start_byte() {
        let body = [0x01, START_BYTE, 0x02, ESCAPE_BYTE, 0x03];
        let stuffed = stuff(&body);
        assert!(!stuffed.contains(&START_BYTE));
        let mut i = 0;
        while i < stuffed.len() {
            if stuffed[i] == ESCAPE_BYTE {
                let next = stuffed[i + 1];
                assert!(next == ESCAPED_START || next == ESCAPED_ESCAPE);
                i += 2;
            } else {
                i += 1;
            }
        }
        assert_eq!(unstuff(&stuffed).unwrap(), body);
    }

    #[test]
    fn unstuff_rejects_bad_escape() {
        let bad = [ESCAPE_BYTE, 0x00];
        assert_eq!(unstuff(&bad), Err(FrameError::BadEscape));
    }

    #[test]
    fn length_byte_equals_one_plus_data_len() {
        let data = [0xAA; 5];
        let frame = encode_frame(0x06, &data);
        let unstuffed = unstuff(&frame[1..]).unwrap();
        assert_eq!(unstuffed[0] as usize, 1 + data.len());
    }

    #[test]
    fn encode_then_read_frame_roundtrips() {
        let data = [0x01, 0x02, 0x03];
        let frame = encode_frame(0x06, &data);
        let mut reader = FrameReader::new(MemorySource::new(&frame));
        let decoded = reader
            .read_frame(Duration::from_millis(50), true)
            .expect("should decode");
        assert_eq!(decoded.msg_type, 0x06);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn read_frame_rejects_corrupted_checksum_and_flushes() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut frame = encode_frame(0x06, &data);
        // flip a data bit inside the stuffed body (well past header).
        let flip_at = frame.len() - 3;
        frame[flip_at] ^= 0x01;
        let mut reader = FrameReader::new(MemorySource::new(&frame));
        let err = reader
            .read_frame(Duration::from_millis(50), true)
            .expect_err("checksum should fail");
        assert_eq!(err, FrameError::BadChecksum);
        assert!(reader.source_mut().flushed);
    }

    #[test]
    fn read_frame_times_out_on_empty_source() {
        let mut reader = FrameReader::new(MemorySource::new(&[]));
        let err = reader
            .read_frame(Duration::from_millis(10), true)
            .expect_err("empty source should time out");
        assert_eq!(err, FrameError::Timeout);
    }

    #[test]
    fn ack_bit_and_code_are_split_correctly() {
        let frame = DecodedFrame {
            msg_type: 0x3C | ACK_REQUEST_BIT,
            data: vec![],
        };
        assert_eq!(frame.code(), 0x3C);
        assert!(frame.wants_ack());
    }
}
