use std::io::{IoSlice, Write};

use tracing::trace;

use crate::encoder::EncodedSample;
use crate::transport::wire::{
    encode_header, encoded_len, pose_block, write_vectored_all, FrameLayout,
};
use crate::transport::{SampleSink, TransportError};

/// Writes each sample as one vectored write of header, payload and pose.
pub struct SocketTransmitter<W> {
    writer: W,
    layout: FrameLayout,
}

impl<W: Write + Send> SocketTransmitter<W> {
    pub fn new(writer: W, layout: FrameLayout) -> Self {
        Self { writer, layout }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> SampleSink for SocketTransmitter<W> {
    fn send(&mut self, sample: &EncodedSample) -> Result<(), TransportError> {
        let header = encode_header(sample.sample_time, sample.payload.len())?;

        match self.layout {
            FrameLayout::Raw => write_vectored_all(
                &mut self.writer,
                &mut [IoSlice::new(&header), IoSlice::new(&sample.payload)],
            )?,
            FrameLayout::Posed => {
                let pose = pose_block(sample);
                write_vectored_all(
                    &mut self.writer,
                    &mut [
                        IoSlice::new(&header),
                        IoSlice::new(&sample.payload),
                        IoSlice::new(&pose),
                    ],
                )?
            }
        }
        self.writer.flush()?;

        trace!(
            sample_time = sample.sample_time,
            bytes = encoded_len(sample.payload.len(), self.layout),
            "sample sent"
        );
        Ok(())
    }
}
