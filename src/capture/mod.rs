pub mod frame;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use frame::{Frame, PixelFormat};
pub use source::{AcquireError, FrameSource};
pub use synthetic::SyntheticSource;
#[cfg(feature = "v4l2-capture")]
pub use v4l2::V4l2Source;
