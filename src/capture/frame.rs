use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw sensor frame as delivered by a frame source
///
/// The pixel buffer is owned by the acquisition thread for one loop iteration
/// and is not retained past encoder submission.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Hardware timestamp in host clock ticks
    pub host_ticks: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Immutable pixel data
    pub data: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes in the luma plane for this frame's resolution.
    pub fn luma_size(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit grayscale, one plane
    Gray8,
}

/// Copy an 8-bit grayscale frame into an NV12 buffer with neutral chroma.
///
/// Returns `None` when the frame holds fewer than `width * height` bytes.
pub fn gray_to_nv12(frame: &Frame) -> Option<Vec<u8>> {
    const NEUTRAL_CHROMA: u8 = 0x80;

    let luma = frame.luma_size();
    if frame.len() < luma {
        return None;
    }

    let chroma = luma / 2;
    let mut buffer = Vec::with_capacity(luma + chroma);
    buffer.extend_from_slice(&frame.data[..luma]);
    buffer.resize(luma + chroma, NEUTRAL_CHROMA);
    Some(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, fill: u8) -> Frame {
        Frame {
            host_ticks: 0,
            width,
            height,
            format: PixelFormat::Gray8,
            data: Bytes::from(vec![fill; (width * height) as usize]),
        }
    }

    #[test]
    fn nv12_pads_neutral_chroma() {
        let frame = gray(4, 2, 7);
        let nv12 = gray_to_nv12(&frame).expect("full frame");

        assert_eq!(nv12.len(), 12);
        assert!(nv12[..8].iter().all(|&b| b == 7));
        assert!(nv12[8..].iter().all(|&b| b == 0x80));
    }

    #[test]
    fn nv12_rejects_short_frame() {
        let mut frame = gray(4, 2, 1);
        frame.data = frame.data.slice(..5);
        assert!(gray_to_nv12(&frame).is_none());
    }
}
