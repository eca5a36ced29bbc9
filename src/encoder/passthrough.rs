use bytes::Bytes;

use crate::encoder::{CodecError, CodecOutput, RawFrame, SampleCodec};

/// Software codec that forwards the luma plane untouched.
///
/// Emits exactly one output per input and never buffers, which makes it the
/// reference backend for tests and for consumers that want raw grayscale.
#[derive(Debug, Default)]
pub struct PassthroughCodec;

impl SampleCodec for PassthroughCodec {
    fn encode(&mut self, frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError> {
        let luma = frame.width as usize * frame.height as usize;
        if frame.data.len() < luma || luma == 0 {
            return Err(CodecError::InvalidInput(format!(
                "frame {} has {} bytes, expected at least {}",
                frame.index,
                frame.data.len(),
                luma
            )));
        }

        let mut data = frame.data;
        data.truncate(luma);
        Ok(vec![CodecOutput {
            index: frame.index,
            data: Bytes::from(data),
        }])
    }

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        Ok(Vec::new())
    }
}
