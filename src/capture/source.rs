//! Blocking pull interface over a hardware sensor

use thiserror::Error;

use super::Frame;

/// Why a frame could not be acquired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The sensor missed a frame; the next call may succeed
    #[error("transient acquisition failure: {0}")]
    Transient(String),

    /// The device is unusable for the rest of the session
    #[error("fatal acquisition failure: {0}")]
    Fatal(String),

    /// The source has no more frames to give
    #[error("frame source exhausted")]
    EndOfStream,
}

/// Sensor frame producer driven by the acquisition thread.
///
/// `next_frame` blocks until the hardware delivers a frame or fails.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), AcquireError>;

    fn next_frame(&mut self) -> Result<Frame, AcquireError>;

    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), AcquireError> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Frame, AcquireError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
