//! Per-sample wire layout
//!
//! ```text
//! i64 sample_time | u32 payload_len | payload[payload_len] | f32[16] pose (posed only)
//! ```
//! All integers and floats are little-endian.

use std::io::{self, IoSlice, Write};

use crate::encoder::EncodedSample;
use crate::pose::{PoseMatrix, POSE_BYTES};
use crate::transport::TransportError;

pub const SAMPLE_HEADER_BYTES: usize = 8 + 4;

/// Which trailing blocks follow the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    Raw,
    Posed,
}

/// Total bytes on the wire for a payload of `payload_len` bytes.
pub fn encoded_len(payload_len: usize, layout: FrameLayout) -> usize {
    match layout {
        FrameLayout::Raw => SAMPLE_HEADER_BYTES + payload_len,
        FrameLayout::Posed => SAMPLE_HEADER_BYTES + payload_len + POSE_BYTES,
    }
}

pub fn encode_header(
    sample_time: i64,
    payload_len: usize,
) -> Result<[u8; SAMPLE_HEADER_BYTES], TransportError> {
    let len = u32::try_from(payload_len).map_err(|_| TransportError::PayloadTooLarge(payload_len))?;

    let mut header = [0u8; SAMPLE_HEADER_BYTES];
    header[..8].copy_from_slice(&sample_time.to_le_bytes());
    header[8..].copy_from_slice(&len.to_le_bytes());
    Ok(header)
}

/// Pose block for a sample; identity when the sample carries no pose.
pub fn pose_block(sample: &EncodedSample) -> [u8; POSE_BYTES] {
    match sample.metadata {
        Some(blob) => *blob.as_bytes(),
        None => PoseMatrix::IDENTITY.to_le_bytes(),
    }
}

/// Write every segment, issuing as few vectored writes as the writer allows.
pub fn write_vectored_all<W: Write + ?Sized>(
    writer: &mut W,
    mut bufs: &mut [IoSlice<'_>],
) -> io::Result<()> {
    // Skip leading empty segments
    IoSlice::advance_slices(&mut bufs, 0);
    while !bufs.is_empty() {
        match writer.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::UserPayload;
    use bytes::Bytes;

    fn sample(len: usize, metadata: Option<UserPayload>) -> EncodedSample {
        EncodedSample {
            sample_time: -5,
            duration: 333_333,
            payload: Bytes::from(vec![0xAB; len]),
            metadata,
        }
    }

    #[test]
    fn header_is_time_then_length() {
        let header = encode_header(-5, 10).unwrap();
        assert_eq!(&header[..8], &(-5i64).to_le_bytes());
        assert_eq!(&header[8..], &10u32.to_le_bytes());
        assert_eq!(encoded_len(10, FrameLayout::Raw), 8 + 4 + 10);
        assert_eq!(encoded_len(10, FrameLayout::Posed), 8 + 4 + 10 + 64);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_payload_is_rejected() {
        let len = u32::MAX as usize + 1;
        assert!(matches!(
            encode_header(0, len),
            Err(TransportError::PayloadTooLarge(n)) if n == len
        ));
    }

    #[test]
    fn pose_block_falls_back_to_identity() {
        assert_eq!(pose_block(&sample(3, None)), PoseMatrix::IDENTITY.to_le_bytes());

        let pose = PoseMatrix::translation(1.0, 2.0, 3.0);
        let tagged = sample(3, Some(UserPayload(pose.to_le_bytes())));
        assert_eq!(pose_block(&tagged), pose.to_le_bytes());
    }

    /// Accepts at most `chunk` bytes per call to exercise partial writes.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn vectored_write_survives_partial_writes() {
        let mut writer = Trickle {
            out: Vec::new(),
            chunk: 3,
        };
        let a = [1u8, 2, 3, 4];
        let b: [u8; 0] = [];
        let c = [5u8, 6, 7, 8, 9];
        write_vectored_all(
            &mut writer,
            &mut [IoSlice::new(&a), IoSlice::new(&b), IoSlice::new(&c)],
        )
        .unwrap();
        assert_eq!(writer.out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
