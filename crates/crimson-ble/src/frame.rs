//! # Frame Extraction
//!
//! Every protocol frame starts with a 6-byte header whose bytes 4–5 carry the
//! body size (big-endian). The full frame is the body plus a fixed 10-byte
//! wrapper:
//!
//! ```text
//! ┌──────────── header (6) ────────────┬──── body ────┬─ trailer (4) ─┐
//! │ b0  b1  b2  b3 │ size_hi  size_lo  │  size bytes  │               │
//! └────────────────┴───────────────────┴──────────────┴───────────────┘
//! ```
//!
//! [`extract_frame`] is applied both to inbound notification buffers and to
//! codec output before a write; the codec may hand back a scratch buffer
//! longer than the packed frame.
//!
//! Frames split across several notifications are not reassembled. A short
//! buffer yields [`CrimsonError::FrameIncomplete`] and the caller drops it.

use crate::error::{CrimsonError, CrimsonResult};
use crate::protocol::constants::{FRAME_HEADER_LEN, FRAME_WRAPPER_LEN};

/// Body size declared in the frame header, or `None` if the header itself is
/// incomplete.
#[must_use]
pub fn body_size(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    Some(usize::from(u16::from_be_bytes([buf[4], buf[5]])))
}

/// Total frame length declared by the header (`body_size + 10`).
#[must_use]
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    body_size(buf).map(|size| size + FRAME_WRAPPER_LEN)
}

/// Return the first complete frame in `buf`, ignoring any trailing bytes.
///
/// # Errors
///
/// Returns [`CrimsonError::FrameIncomplete`] when `buf` is shorter than the
/// header or than the length the header declares.
pub fn extract_frame(buf: &[u8]) -> CrimsonResult<&[u8]> {
    let Some(len) = frame_len(buf) else {
        return Err(CrimsonError::FrameIncomplete {
            expected: FRAME_HEADER_LEN,
            actual: buf.len(),
        });
    };
    buf.get(..len).ok_or(CrimsonError::FrameIncomplete {
        expected: len,
        actual: buf.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_body(size: u16, total: usize) -> Vec<u8> {
        let mut buf = vec![0xAA; total];
        buf[4..6].copy_from_slice(&size.to_be_bytes());
        buf
    }

    #[test]
    fn test_frame_len_law() {
        for size in [0u16, 1, 7, 255, 256, 1024] {
            let buf = frame_with_body(size, usize::from(size) + 10);
            assert_eq!(frame_len(&buf), Some(usize::from(size) + 10));
            assert_eq!(extract_frame(&buf).unwrap().len(), usize::from(size) + 10);
        }
    }

    #[test]
    fn test_body_size_is_big_endian() {
        let buf = [0, 0, 0, 0, 0x01, 0x02];
        assert_eq!(body_size(&buf), Some(0x0102));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut buf = frame_with_body(3, 13);
        buf.extend_from_slice(&[0xFF; 20]);
        let frame = extract_frame(&buf).unwrap();
        assert_eq!(frame.len(), 13);
        assert_eq!(frame, &buf[..13]);
    }

    #[test]
    fn test_short_header_is_incomplete() {
        let err = extract_frame(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            CrimsonError::FrameIncomplete {
                expected: 6,
                actual: 3
            }
        ));
        assert!(extract_frame(&[]).is_err());
    }

    #[test]
    fn test_truncated_body_is_incomplete() {
        let buf = frame_with_body(20, 12);
        let err = extract_frame(&buf).unwrap_err();
        assert!(matches!(
            err,
            CrimsonError::FrameIncomplete {
                expected: 30,
                actual: 12
            }
        ));
    }

    #[test]
    fn test_exact_header_with_zero_body_needs_wrapper() {
        let buf = frame_with_body(0, 6);
        assert!(extract_frame(&buf).is_err());
        let buf = frame_with_body(0, 10);
        assert_eq!(extract_frame(&buf).unwrap().len(), 10);
    }
}
